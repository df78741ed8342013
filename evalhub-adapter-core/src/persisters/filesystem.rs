use crate::domain::{OCIArtifactResult, OCIArtifactSpec};
use crate::logging::{LogEvent, LogLevel, SharedEventLogger};
use crate::persister::{
    artifact_coordinates, build_manifest, empty_artifact, load_artifact_files, sha256_digest,
    total_size, ArtifactPersister, PersistError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Content-addressed local store laid out as
/// `{root}/{repository}/{manifest-digest-hex}/`.
pub struct FilesystemPersister {
    root: PathBuf,
    logger: SharedEventLogger,
}

impl FilesystemPersister {
    pub fn new(root: impl Into<PathBuf>, logger: SharedEventLogger) -> Self {
        Self {
            root: root.into(),
            logger,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn relative_target(title: &str) -> Result<PathBuf, PersistError> {
    let rel = Path::new(title);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(PersistError::Validation(format!(
            "artifact title '{title}' escapes the artifact directory"
        )));
    }
    Ok(rel.to_path_buf())
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistError::io(parent, e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| PersistError::io(path, e))
}

#[async_trait]
impl ArtifactPersister for FilesystemPersister {
    fn kind(&self) -> &'static str {
        "filesystem"
    }

    async fn persist(&self, spec: &OCIArtifactSpec) -> Result<OCIArtifactResult, PersistError> {
        let files = load_artifact_files(spec).await?;
        let (repository, tag) = artifact_coordinates(spec);
        let base = format!("file://{}/{repository}:{tag}", self.root.display());

        if files.is_empty() {
            return Ok(empty_artifact(&base));
        }

        let targets = files
            .iter()
            .map(|f| relative_target(&f.title))
            .collect::<Result<Vec<_>, _>>()?;

        let created = Utc::now();
        let manifest = serde_json::to_vec_pretty(&build_manifest(spec, &files, created))?;
        let digest = sha256_digest(&manifest);
        let hex = digest.trim_start_matches("sha256:");
        let dir = self.root.join(&repository).join(hex);

        for (f, rel) in files.iter().zip(&targets) {
            write_file(&dir.join(rel), &f.bytes).await?;
        }
        write_file(&dir.join(MANIFEST_FILE), &manifest).await?;

        self.logger.log(
            LogEvent::new(LogLevel::Info, "artifact.stored")
                .with_job(spec.job_id.clone())
                .with_field("dir", dir.display().to_string())
                .with_field("files", files.len().to_string()),
        );

        Ok(OCIArtifactResult {
            reference: format!("{base}@{digest}"),
            digest,
            size_bytes: total_size(&files),
            created_at: created,
        })
    }
}
