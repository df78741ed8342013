use crate::domain::{JobId, JobStatusUpdate, OCIArtifactResult, OCIArtifactSpec};
use crate::logging::{LogEvent, LogLevel, SharedEventLogger};
use crate::metrics::SharedMetrics;
use crate::persister::{PersistError, SharedPersister};
use crate::persisters::create_persister;
use crate::reporter::{SharedStatusReporter, SidecarReporter};
use crate::settings::AdapterSettings;
use std::sync::Arc;

/// What an adapter gets to talk back to the platform: a status channel and
/// an artifact store. Either side can be swapped independently.
#[derive(Clone)]
pub struct JobCallbacks {
    pub status: SharedStatusReporter,
    pub persister: SharedPersister,
    pub metrics: SharedMetrics,
    pub logger: SharedEventLogger,
}

impl JobCallbacks {
    pub fn new(
        status: SharedStatusReporter,
        persister: SharedPersister,
        metrics: SharedMetrics,
        logger: SharedEventLogger,
    ) -> Self {
        Self {
            status,
            persister,
            metrics,
            logger,
        }
    }

    /// Sidecar reporter plus the persister selected by the settings.
    pub fn from_settings(
        settings: &AdapterSettings,
        job_id: impl Into<JobId>,
        logger: SharedEventLogger,
        metrics: SharedMetrics,
    ) -> Result<Self, PersistError> {
        Self::with_sidecar(settings, job_id, logger, metrics).map(|(callbacks, _)| callbacks)
    }

    /// Same as `from_settings`, also handing back the sidecar reporter so it
    /// can deliver the final results.
    pub(crate) fn with_sidecar(
        settings: &AdapterSettings,
        job_id: impl Into<JobId>,
        logger: SharedEventLogger,
        metrics: SharedMetrics,
    ) -> Result<(Self, Arc<SidecarReporter>), PersistError> {
        let reporter = Arc::new(SidecarReporter::from_settings(
            settings,
            job_id,
            logger.clone(),
            metrics.clone(),
        ));
        let persister: SharedPersister =
            Arc::from(create_persister(settings.persister_config(), logger.clone())?);
        let callbacks = Self::new(reporter.clone(), persister, metrics, logger);
        Ok((callbacks, reporter))
    }

    pub async fn report_status(&self, update: JobStatusUpdate) {
        self.status.report_status(&update).await;
    }

    pub async fn create_oci_artifact(
        &self,
        spec: &OCIArtifactSpec,
    ) -> Result<OCIArtifactResult, PersistError> {
        match self.persister.persist(spec).await {
            Ok(result) => {
                self.metrics.record_artifact_persisted(result.size_bytes);
                self.logger.log(
                    LogEvent::new(LogLevel::Info, "artifact.persisted")
                        .with_job(spec.job_id.clone())
                        .with_field("backend", self.persister.kind())
                        .with_field("digest", result.digest.clone())
                        .with_field("size_bytes", result.size_bytes.to_string()),
                );
                Ok(result)
            }
            Err(e) => {
                self.metrics.inc_artifact_failure();
                self.logger.log(
                    LogEvent::new(LogLevel::Error, "artifact.failed")
                        .with_job(spec.job_id.clone())
                        .with_field("backend", self.persister.kind())
                        .with_field("error", e.to_string()),
                );
                Err(e)
            }
        }
    }
}
