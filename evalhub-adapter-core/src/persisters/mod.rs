mod filesystem;
mod placeholder;
mod registry;

pub use filesystem::FilesystemPersister;
pub use placeholder::PlaceholderPersister;
pub use registry::{BearerChallenge, RegistryPersister};

use crate::logging::SharedEventLogger;
use crate::persister::{ArtifactPersister, PersistError, PersisterConfig};

pub fn create_persister(
    config: PersisterConfig,
    logger: SharedEventLogger,
) -> Result<Box<dyn ArtifactPersister>, PersistError> {
    match config {
        PersisterConfig::Placeholder { registry_url } => {
            Ok(Box::new(PlaceholderPersister::new(registry_url, logger)))
        }
        PersisterConfig::Registry {
            url,
            username,
            password,
            insecure,
        } => Ok(Box::new(RegistryPersister::new(
            &url, username, password, insecure, logger,
        )?)),
        PersisterConfig::Filesystem { root } => Ok(Box::new(FilesystemPersister::new(root, logger))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoopEventLogger;
    use std::sync::Arc;

    #[test]
    fn factory_builds_each_backend() {
        let logger = Arc::new(NoopEventLogger);
        let p = create_persister(PersisterConfig::Placeholder { registry_url: None }, logger.clone())
            .unwrap();
        assert_eq!(p.kind(), "placeholder");

        let p = create_persister(
            PersisterConfig::Registry {
                url: "localhost:5000".to_string(),
                username: None,
                password: None,
                insecure: true,
            },
            logger.clone(),
        )
        .unwrap();
        assert_eq!(p.kind(), "registry");

        let p = create_persister(
            PersisterConfig::Filesystem {
                root: std::env::temp_dir(),
            },
            logger,
        )
        .unwrap();
        assert_eq!(p.kind(), "filesystem");
    }

    #[test]
    fn persister_config_is_tagged() {
        let cfg: PersisterConfig = serde_json::from_str(
            r#"{"type":"Registry","url":"ghcr.io","username":"u","password":"p","insecure":false}"#,
        )
        .unwrap();
        assert!(matches!(cfg, PersisterConfig::Registry { insecure: false, .. }));
    }
}
