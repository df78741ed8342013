use crate::domain::{OCIArtifactResult, OCIArtifactSpec};
use crate::logging::{LogEvent, LogLevel, SharedEventLogger};
use crate::persister::{
    artifact_coordinates, bundle_digest, empty_artifact, load_artifact_files, total_size,
    ArtifactPersister, PersistError, DEFAULT_REGISTRY,
};
use async_trait::async_trait;
use chrono::Utc;

/// Reads and hashes the files but stores nothing. The returned reference
/// does not resolve.
pub struct PlaceholderPersister {
    registry_url: String,
    logger: SharedEventLogger,
}

impl PlaceholderPersister {
    pub fn new(registry_url: Option<String>, logger: SharedEventLogger) -> Self {
        Self {
            registry_url: registry_url.unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
            logger,
        }
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }
}

#[async_trait]
impl ArtifactPersister for PlaceholderPersister {
    fn kind(&self) -> &'static str {
        "placeholder"
    }

    async fn persist(&self, spec: &OCIArtifactSpec) -> Result<OCIArtifactResult, PersistError> {
        let files = load_artifact_files(spec).await?;
        let (repository, tag) = artifact_coordinates(spec);
        let base = format!(
            "{}/{repository}:{tag}",
            self.registry_url.trim_end_matches('/')
        );

        self.logger.log(
            LogEvent::new(LogLevel::Warn, "artifact.placeholder")
                .with_job(spec.job_id.clone())
                .with_field("reference", base.clone())
                .with_field("files", files.len().to_string()),
        );

        if files.is_empty() {
            return Ok(empty_artifact(&base));
        }

        let digest = bundle_digest(&files);
        Ok(OCIArtifactResult {
            reference: format!("{base}@{digest}"),
            digest,
            size_bytes: total_size(&files),
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::BufferedEventLogger;
    use crate::persister::EMPTY_SET_DIGEST;
    use std::sync::Arc;

    #[tokio::test]
    async fn reports_bundle_digest_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = dir.path().join("file1.txt");
        let f2 = dir.path().join("file2.txt");
        std::fs::write(&f1, "test content 1").unwrap();
        std::fs::write(&f2, "test content 2").unwrap();

        let logger = Arc::new(BufferedEventLogger::default());
        let persister = PlaceholderPersister::new(Some("ghcr.io".to_string()), logger.clone());
        let spec = OCIArtifactSpec::new(vec![f1, f2], "test_job", "mmlu", "test_model");
        let result = persister.persist(&spec).await.unwrap();

        assert!(result.digest.starts_with("sha256:"));
        assert_ne!(result.digest, EMPTY_SET_DIGEST);
        assert!(result
            .reference
            .starts_with("ghcr.io/eval-results/mmlu:test_job@sha256:"));
        assert_eq!(result.size_bytes, 28);
        assert_eq!(logger.messages(), vec!["artifact.placeholder"]);
    }

    #[tokio::test]
    async fn empty_file_list_has_deterministic_digest() {
        let persister = PlaceholderPersister::new(None, Arc::new(BufferedEventLogger::default()));
        assert_eq!(persister.registry_url(), "localhost:5000");
        let spec = OCIArtifactSpec::new(vec![], "job", "test", "model");
        let a = persister.persist(&spec).await.unwrap();
        let b = persister.persist(&spec).await.unwrap();
        assert_eq!(a.size_bytes, 0);
        assert_eq!(a.digest, EMPTY_SET_DIGEST);
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.reference, b.reference);
    }
}
