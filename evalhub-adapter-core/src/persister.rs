use crate::domain::{OCIArtifactResult, OCIArtifactSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Digest reported for an artifact with no files: SHA-256 of zero bytes.
pub const EMPTY_SET_DIGEST: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
pub const DEFAULT_REGISTRY: &str = "localhost:5000";
pub const REPOSITORY_PREFIX: &str = "eval-results";

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const EMPTY_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";
pub const ARTIFACT_TYPE: &str = "application/vnd.evalhub.results.v1";
pub const EMPTY_CONFIG: &[u8] = b"{}";

pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
pub const ANNOTATION_DESCRIPTION: &str = "org.opencontainers.image.description";
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";
pub const ANNOTATION_JOB_ID: &str = "io.evalhub.job-id";
pub const ANNOTATION_BENCHMARK_ID: &str = "io.evalhub.benchmark-id";
pub const ANNOTATION_MODEL_NAME: &str = "io.evalhub.model-name";

#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error("invalid artifact spec: {0}")]
    Validation(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("registry transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry returned HTTP {status} during {operation}: {message}")]
    Registry {
        operation: String,
        status: u16,
        message: String,
    },
}

impl PersistError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PersisterConfig {
    Placeholder {
        registry_url: Option<String>,
    },
    Registry {
        url: String,
        username: Option<String>,
        password: Option<String>,
        insecure: bool,
    },
    Filesystem {
        root: PathBuf,
    },
}

/// Storage backend for result artifacts. Failures are returned to the
/// adapter; a job result without its artifact is incomplete.
#[async_trait]
pub trait ArtifactPersister: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn persist(&self, spec: &OCIArtifactSpec) -> Result<OCIArtifactResult, PersistError>;
}

pub type SharedPersister = Arc<dyn ArtifactPersister>;

/// A validated file ready to be bundled.
#[derive(Clone, Debug)]
pub struct ArtifactFile {
    pub path: PathBuf,
    pub title: String,
    pub media_type: String,
    pub digest: String,
    pub bytes: Vec<u8>,
}

impl ArtifactFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

pub fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("json") => "application/json",
        Some("jsonl") => "application/x-ndjson",
        Some("txt") | Some("log") | Some("md") => "text/plain",
        Some("csv") => "text/csv",
        Some("html") => "text/html",
        _ => "application/octet-stream",
    }
}

fn title_for(path: &Path, base_path: Option<&Path>) -> String {
    if let Some(rel) = base_path.and_then(|b| path.strip_prefix(b).ok()) {
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if !parts.is_empty() {
            return parts.join("/");
        }
    }
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Checks every file exists, is a regular non-empty file and maps to a
/// unique title. Runs before any backend I/O.
pub async fn validate_artifact_files(
    spec: &OCIArtifactSpec,
) -> Result<Vec<(PathBuf, String)>, PersistError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(spec.files.len());
    for path in &spec.files {
        let meta = tokio::fs::metadata(path).await.map_err(|_| {
            PersistError::Validation(format!("file does not exist: {}", path.display()))
        })?;
        if !meta.is_file() {
            return Err(PersistError::Validation(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        if meta.len() == 0 {
            return Err(PersistError::Validation(format!(
                "file is empty: {}",
                path.display()
            )));
        }
        let title = title_for(path, spec.base_path.as_deref());
        if !seen.insert(title.clone()) {
            return Err(PersistError::Validation(format!(
                "duplicate artifact entry '{title}'"
            )));
        }
        out.push((path.clone(), title));
    }
    Ok(out)
}

pub async fn load_artifact_files(spec: &OCIArtifactSpec) -> Result<Vec<ArtifactFile>, PersistError> {
    let validated = validate_artifact_files(spec).await?;
    let mut files = Vec::with_capacity(validated.len());
    for (path, title) in validated {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PersistError::io(&path, e))?;
        files.push(ArtifactFile {
            media_type: media_type_for(&path).to_string(),
            digest: sha256_digest(&bytes),
            title,
            path,
            bytes,
        });
    }
    Ok(files)
}

/// Order-sensitive digest over file titles and content digests.
/// An empty bundle hashes to [`EMPTY_SET_DIGEST`].
pub fn bundle_digest(files: &[ArtifactFile]) -> String {
    let mut hasher = Sha256::new();
    for f in files {
        hasher.update(f.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(f.digest.as_bytes());
        hasher.update(b"\n");
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub fn total_size(files: &[ArtifactFile]) -> u64 {
    files.iter().map(ArtifactFile::size).sum()
}

fn sanitize_repository_component(raw: &str) -> String {
    let s: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '-',
        })
        .collect();
    let s = s.trim_matches(|c| c == '.' || c == '_' || c == '-').to_string();
    if s.is_empty() {
        "unknown".to_string()
    } else {
        s
    }
}

fn sanitize_tag(raw: &str) -> String {
    let mut s: String = raw
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '-',
        })
        .take(128)
        .collect();
    if s.is_empty() {
        return "latest".to_string();
    }
    if s.starts_with('.') || s.starts_with('-') {
        s.insert(0, '_');
        s.truncate(128);
    }
    s
}

/// Repository and tag an artifact is stored under.
pub fn artifact_coordinates(spec: &OCIArtifactSpec) -> (String, String) {
    (
        format!(
            "{REPOSITORY_PREFIX}/{}",
            sanitize_repository_component(&spec.benchmark_id)
        ),
        sanitize_tag(&spec.job_id),
    )
}

pub fn empty_artifact(base_reference: &str) -> OCIArtifactResult {
    OCIArtifactResult {
        digest: EMPTY_SET_DIGEST.to_string(),
        reference: format!("{base_reference}@{EMPTY_SET_DIGEST}"),
        size_bytes: 0,
        created_at: Utc::now(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub artifact_type: String,
    pub config: OciDescriptor,
    pub layers: Vec<OciDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl OciManifest {
    pub fn layer_titles(&self) -> Vec<&str> {
        self.layers
            .iter()
            .filter_map(|l| l.annotations.get(ANNOTATION_TITLE).map(String::as_str))
            .collect()
    }
}

pub fn build_manifest(
    spec: &OCIArtifactSpec,
    files: &[ArtifactFile],
    created: DateTime<Utc>,
) -> OciManifest {
    let layers = files
        .iter()
        .map(|f| OciDescriptor {
            media_type: f.media_type.clone(),
            digest: f.digest.clone(),
            size: f.size(),
            annotations: BTreeMap::from([(ANNOTATION_TITLE.to_string(), f.title.clone())]),
        })
        .collect();

    let mut annotations: BTreeMap<String, String> = spec
        .annotations
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(t) = &spec.title {
        annotations.insert(ANNOTATION_TITLE.to_string(), t.clone());
    }
    if let Some(d) = &spec.description {
        annotations.insert(ANNOTATION_DESCRIPTION.to_string(), d.clone());
    }
    annotations.insert(ANNOTATION_CREATED.to_string(), created.to_rfc3339());
    annotations.insert(ANNOTATION_JOB_ID.to_string(), spec.job_id.clone());
    annotations.insert(ANNOTATION_BENCHMARK_ID.to_string(), spec.benchmark_id.clone());
    annotations.insert(ANNOTATION_MODEL_NAME.to_string(), spec.model_name.clone());

    OciManifest {
        schema_version: 2,
        media_type: MANIFEST_MEDIA_TYPE.to_string(),
        artifact_type: ARTIFACT_TYPE.to_string(),
        config: OciDescriptor {
            media_type: EMPTY_CONFIG_MEDIA_TYPE.to_string(),
            digest: sha256_digest(EMPTY_CONFIG),
            size: EMPTY_CONFIG.len() as u64,
            annotations: BTreeMap::new(),
        },
        layers,
        annotations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(files: Vec<PathBuf>) -> OCIArtifactSpec {
        OCIArtifactSpec::new(files, "eval-001", "MMLU Pro", "test-model")
    }

    #[test]
    fn empty_bundle_digest_is_sha256_of_nothing() {
        assert_eq!(bundle_digest(&[]), EMPTY_SET_DIGEST);
        assert_eq!(sha256_digest(b""), EMPTY_SET_DIGEST);
    }

    #[test]
    fn empty_config_digest_matches_oci_well_known_value() {
        assert_eq!(
            sha256_digest(EMPTY_CONFIG),
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[tokio::test]
    async fn validation_rejects_missing_empty_and_duplicate_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("results.json");
        std::fs::write(&good, "{}").unwrap();
        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "").unwrap();

        let missing = spec_with(vec![good.clone(), dir.path().join("nope.json")]);
        assert!(matches!(
            validate_artifact_files(&missing).await,
            Err(PersistError::Validation(_))
        ));
        assert!(matches!(
            validate_artifact_files(&spec_with(vec![empty])).await,
            Err(PersistError::Validation(_))
        ));
        assert!(matches!(
            validate_artifact_files(&spec_with(vec![dir.path().to_path_buf()])).await,
            Err(PersistError::Validation(_))
        ));
        assert!(matches!(
            validate_artifact_files(&spec_with(vec![good.clone(), good.clone()])).await,
            Err(PersistError::Validation(_))
        ));
        assert_eq!(validate_artifact_files(&spec_with(vec![good])).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn titles_are_relative_to_base_path() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("sub");
        std::fs::create_dir_all(&nested).unwrap();
        let file = nested.join("scores.csv");
        std::fs::write(&file, "a,b\n1,2\n").unwrap();

        let mut spec = spec_with(vec![file.clone()]);
        assert_eq!(validate_artifact_files(&spec).await.unwrap()[0].1, "scores.csv");
        spec.base_path = Some(dir.path().to_path_buf());
        assert_eq!(validate_artifact_files(&spec).await.unwrap()[0].1, "sub/scores.csv");
    }

    #[test]
    fn coordinates_are_sanitized() {
        let spec = OCIArtifactSpec::new(vec![], "-job/42", "MMLU Pro", "m");
        assert_eq!(
            artifact_coordinates(&spec),
            ("eval-results/mmlu-pro".to_string(), "_-job-42".to_string())
        );
        let spec = OCIArtifactSpec::new(vec![], "", "///", "m");
        assert_eq!(
            artifact_coordinates(&spec),
            ("eval-results/unknown".to_string(), "latest".to_string())
        );
    }

    #[tokio::test]
    async fn manifest_lists_every_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("results.json");
        let b = dir.path().join("summary.txt");
        std::fs::write(&a, r#"{"accuracy":0.85}"#).unwrap();
        std::fs::write(&b, "accuracy: 0.85\n").unwrap();

        let mut spec = spec_with(vec![a, b]);
        spec.title = Some("Evaluation results".to_string());
        spec.annotations
            .insert("overall_score".to_string(), "0.85".to_string());
        let files = load_artifact_files(&spec).await.unwrap();
        let manifest = build_manifest(&spec, &files, Utc::now());

        assert_eq!(manifest.layer_titles(), vec!["results.json", "summary.txt"]);
        assert_eq!(manifest.layers[0].media_type, "application/json");
        assert_eq!(manifest.layers[1].media_type, "text/plain");
        assert_eq!(manifest.annotations[ANNOTATION_JOB_ID], "eval-001");
        assert_eq!(manifest.annotations["overall_score"], "0.85");
        assert_eq!(total_size(&files), 17 + 15);

        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["artifactType"], ARTIFACT_TYPE);
        assert_eq!(value["config"]["mediaType"], EMPTY_CONFIG_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn bundle_digest_depends_on_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "alpha").unwrap();
        std::fs::write(&b, "beta").unwrap();

        let ab = load_artifact_files(&spec_with(vec![a.clone(), b.clone()])).await.unwrap();
        let ba = load_artifact_files(&spec_with(vec![b, a])).await.unwrap();
        assert_ne!(bundle_digest(&ab), bundle_digest(&ba));
        assert_eq!(bundle_digest(&ab), bundle_digest(&ab.clone()));
    }
}
