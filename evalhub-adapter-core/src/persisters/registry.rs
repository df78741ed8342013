use crate::domain::{OCIArtifactResult, OCIArtifactSpec};
use crate::logging::{LogEvent, LogLevel, SharedEventLogger};
use crate::persister::{
    artifact_coordinates, build_manifest, empty_artifact, load_artifact_files, sha256_digest,
    total_size, ArtifactPersister, PersistError, EMPTY_CONFIG, MANIFEST_MEDIA_TYPE,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use std::sync::Mutex;
use std::time::Duration;

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Parsed `WWW-Authenticate: Bearer ...` challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        let mut chars = params.chars().peekable();
        loop {
            while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
                chars.next();
            }
            let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                break;
            }
            let mut value = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    value.push(c);
                }
            } else {
                while let Some(c) = chars.peek() {
                    if *c == ',' {
                        break;
                    }
                    value.push(*c);
                    chars.next();
                }
                value = value.trim().to_string();
            }
            match key.as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Pushes artifacts to an OCI distribution registry: one empty config
/// blob, one layer per file, then the manifest tagged with the job id.
pub struct RegistryPersister {
    base_url: Url,
    host: String,
    namespace: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client: Client,
    logger: SharedEventLogger,
    bearer: Mutex<Option<String>>,
}

impl RegistryPersister {
    pub fn new(
        registry_url: &str,
        username: Option<String>,
        password: Option<String>,
        insecure: bool,
        logger: SharedEventLogger,
    ) -> Result<Self, PersistError> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()?;
        Self::with_client(registry_url, username, password, insecure, client, logger)
    }

    pub fn with_client(
        registry_url: &str,
        username: Option<String>,
        password: Option<String>,
        insecure: bool,
        client: Client,
        logger: SharedEventLogger,
    ) -> Result<Self, PersistError> {
        let raw = registry_url.trim().trim_end_matches('/');
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else if insecure {
            format!("http://{raw}")
        } else {
            format!("https://{raw}")
        };
        let mut base_url = Url::parse(&with_scheme)
            .map_err(|e| PersistError::Validation(format!("invalid registry url '{raw}': {e}")))?;
        let host = match (base_url.host_str(), base_url.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(PersistError::Validation(format!(
                    "registry url '{raw}' has no host"
                )))
            }
        };
        // `ghcr.io/myorg` pushes under `/v2/myorg/...`
        let namespace = Some(base_url.path().trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        base_url.set_path("/");
        Ok(Self {
            base_url,
            host,
            namespace,
            username,
            password,
            client,
            logger,
            bearer: Mutex::new(None),
        })
    }

    /// Registry host as it appears in references.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Repository path inside the registry, including any namespace taken
    /// from the registry URL.
    pub fn repository_for(&self, repository: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{repository}"),
            None => repository.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, PersistError> {
        self.base_url
            .join(path)
            .map_err(|e| PersistError::Validation(format!("invalid registry path '{path}': {e}")))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let token = self.bearer.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(token) = token {
            return req.bearer_auth(token);
        }
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_ref()),
            None => req,
        }
    }

    /// Sends a request, answering one bearer-token challenge if the
    /// registry asks for it.
    async fn send<F>(&self, build: F) -> Result<Response, PersistError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let resp = self.authorize(build()).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        let challenge = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse);
        let Some(challenge) = challenge else {
            return Ok(resp);
        };
        let token = self.fetch_token(&challenge).await?;
        *self.bearer.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
        Ok(self.authorize(build()).send().await?)
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, PersistError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(s) = &challenge.service {
            query.push(("service", s.as_str()));
        }
        if let Some(s) = &challenge.scope {
            query.push(("scope", s.as_str()));
        }
        let mut req = self.client.get(&challenge.realm).query(&query);
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_ref());
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(registry_error("token exchange", resp).await);
        }
        let body: TokenResponse = resp.json().await?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| PersistError::Registry {
                operation: "token exchange".to_string(),
                status: 200,
                message: "response carried no token".to_string(),
            })
    }

    async fn push_blob(
        &self,
        repository: &str,
        digest: &str,
        data: &[u8],
    ) -> Result<(), PersistError> {
        let blob_url = self.endpoint(&format!("/v2/{repository}/blobs/{digest}"))?;
        let head = self.send(|| self.client.head(blob_url.clone())).await?;
        if head.status().is_success() {
            self.logger.log(
                LogEvent::new(LogLevel::Debug, "artifact.blob.exists").with_field("digest", digest),
            );
            return Ok(());
        }

        let start_url = self.endpoint(&format!("/v2/{repository}/blobs/uploads/"))?;
        let resp = self
            .send(|| self.client.post(start_url.clone()).header(CONTENT_LENGTH, "0"))
            .await?;
        if !resp.status().is_success() {
            return Err(registry_error("start upload", resp).await);
        }
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PersistError::Registry {
                operation: "start upload".to_string(),
                status: resp.status().as_u16(),
                message: "missing Location header".to_string(),
            })?;
        let mut upload_url = start_url
            .join(location)
            .map_err(|e| PersistError::Validation(format!("invalid upload location: {e}")))?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        let resp = self
            .send(|| {
                self.client
                    .put(upload_url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(data.to_vec())
            })
            .await?;
        if !resp.status().is_success() {
            return Err(registry_error("upload blob", resp).await);
        }
        self.logger.log(
            LogEvent::new(LogLevel::Debug, "artifact.blob.pushed")
                .with_field("digest", digest)
                .with_field("size", data.len().to_string()),
        );
        Ok(())
    }

    async fn put_manifest(
        &self,
        repository: &str,
        tag: &str,
        body: &[u8],
    ) -> Result<Option<String>, PersistError> {
        let url = self.endpoint(&format!("/v2/{repository}/manifests/{tag}"))?;
        let resp = self
            .send(|| {
                self.client
                    .put(url.clone())
                    .header(CONTENT_TYPE, MANIFEST_MEDIA_TYPE)
                    .body(body.to_vec())
            })
            .await?;
        if !resp.status().is_success() {
            return Err(registry_error("put manifest", resp).await);
        }
        Ok(resp
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}

async fn registry_error(operation: &str, resp: Response) -> PersistError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    PersistError::Registry {
        operation: operation.to_string(),
        status,
        message,
    }
}

#[async_trait]
impl ArtifactPersister for RegistryPersister {
    fn kind(&self) -> &'static str {
        "registry"
    }

    async fn persist(&self, spec: &OCIArtifactSpec) -> Result<OCIArtifactResult, PersistError> {
        let files = load_artifact_files(spec).await?;
        let (repository, tag) = artifact_coordinates(spec);
        let repository = self.repository_for(&repository);
        let base = format!("{}/{repository}:{tag}", self.host);

        if files.is_empty() {
            self.logger.log(
                LogEvent::new(LogLevel::Warn, "artifact.empty")
                    .with_job(spec.job_id.clone())
                    .with_field("reference", base.clone()),
            );
            return Ok(empty_artifact(&base));
        }

        self.logger.log(
            LogEvent::new(LogLevel::Info, "artifact.push.start")
                .with_job(spec.job_id.clone())
                .with_field("reference", base.clone())
                .with_field("files", files.len().to_string()),
        );

        self.push_blob(&repository, &sha256_digest(EMPTY_CONFIG), EMPTY_CONFIG)
            .await?;
        for f in &files {
            self.push_blob(&repository, &f.digest, &f.bytes).await?;
        }

        let created = Utc::now();
        let manifest = build_manifest(spec, &files, created);
        let body = serde_json::to_vec(&manifest)?;
        let digest = sha256_digest(&body);
        if let Some(reported) = self.put_manifest(&repository, &tag, &body).await? {
            if reported != digest {
                self.logger.log(
                    LogEvent::new(LogLevel::Warn, "artifact.digest.mismatch")
                        .with_job(spec.job_id.clone())
                        .with_field("computed", digest.clone())
                        .with_field("reported", reported),
                );
            }
        }

        let result = OCIArtifactResult {
            reference: format!("{base}@{digest}"),
            digest,
            size_bytes: total_size(&files),
            created_at: created,
        };
        self.logger.log(
            LogEvent::new(LogLevel::Info, "artifact.push.done")
                .with_job(spec.job_id.clone())
                .with_field("reference", result.reference.clone())
                .with_field("size_bytes", result.size_bytes.to_string()),
        );
        Ok(result)
    }
}
