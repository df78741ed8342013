use crate::domain::{JobId, JobPhase, JobResults, JobStatus, JobStatusUpdate};
use crate::logging::{LogEvent, LogLevel, SharedEventLogger};
use crate::metrics::SharedMetrics;
use crate::settings::AdapterSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const STATUS_PATH: &str = "/status";
pub const RESULTS_PATH: &str = "/results";

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const RESULTS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum CallbackError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sidecar returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

/// Best-effort lifecycle telemetry. Implementations must not fail the job.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report_status(&self, update: &JobStatusUpdate);
}

/// Delivers the final results once the adapter returns. Same failure policy
/// as [`StatusReporter`].
#[async_trait]
pub trait ResultReporter: Send + Sync {
    async fn report_results(&self, results: &JobResults);
}

#[derive(Clone, Debug, PartialEq)]
pub enum Regression {
    AfterTerminal(JobStatus),
    PhaseBackwards { from: JobPhase, to: JobPhase },
}

/// Watches the sequence of reported updates for regressions.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    last_phase: Option<JobPhase>,
    terminal: Option<JobStatus>,
}

impl LifecycleTracker {
    pub fn observe(&mut self, update: &JobStatusUpdate) -> Option<Regression> {
        if let Some(done) = self.terminal {
            return Some(Regression::AfterTerminal(done));
        }
        if update.status.is_terminal() {
            self.terminal = Some(update.status);
        }
        let phase = update.phase?;
        match self.last_phase {
            Some(prev) if phase < prev => Some(Regression::PhaseBackwards {
                from: prev,
                to: phase,
            }),
            _ => {
                self.last_phase = Some(phase);
                None
            }
        }
    }
}

/// Posts status and results to the local sidecar, or logs them when no
/// sidecar is configured.
pub struct SidecarReporter {
    job_id: JobId,
    sidecar_url: Option<String>,
    client: Client,
    logger: SharedEventLogger,
    metrics: SharedMetrics,
    tracker: Mutex<LifecycleTracker>,
}

impl SidecarReporter {
    pub fn new(
        job_id: impl Into<JobId>,
        sidecar_url: Option<String>,
        logger: SharedEventLogger,
        metrics: SharedMetrics,
    ) -> Self {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(job_id, sidecar_url, client, logger, metrics)
    }

    pub fn with_client(
        job_id: impl Into<JobId>,
        sidecar_url: Option<String>,
        client: Client,
        logger: SharedEventLogger,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            sidecar_url: sidecar_url.map(|u| u.trim_end_matches('/').to_string()),
            client,
            logger,
            metrics,
            tracker: Mutex::new(LifecycleTracker::default()),
        }
    }

    pub fn from_settings(
        settings: &AdapterSettings,
        job_id: impl Into<JobId>,
        logger: SharedEventLogger,
        metrics: SharedMetrics,
    ) -> Self {
        Self::new(job_id, settings.service_url.clone(), logger, metrics)
    }

    pub fn sidecar_url(&self) -> Option<&str> {
        self.sidecar_url.as_deref()
    }

    async fn post_json<T: Serialize + ?Sized + Sync>(
        &self,
        base: &str,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<(), CallbackError> {
        let url = format!("{base}{path}");
        let resp = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(CallbackError::Http { status, body });
        }
        Ok(())
    }

    fn check_sequence(&self, update: &JobStatusUpdate) {
        let regression = self
            .tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .observe(update);
        if let Some(r) = regression {
            self.logger.log(
                LogEvent::new(LogLevel::Warn, "status.out_of_order")
                    .with_job(self.job_id.clone())
                    .with_field("status", update.status.as_str())
                    .with_field("regression", format!("{r:?}")),
            );
        }
    }

    fn log_status_locally(&self, update: &JobStatusUpdate) {
        self.metrics.inc_status_local();
        let mut ev = LogEvent::new(LogLevel::Info, "status.local")
            .with_job(self.job_id.clone())
            .with_field("status", update.status.as_str())
            .with_field("phase", update.phase.map(|p| p.as_str()).unwrap_or("n/a"));
        if let Some(p) = update.progress() {
            ev = ev.with_field("progress", format!("{p:.2}"));
        }
        if let Some(m) = &update.message {
            ev = ev.with_field("message", m.clone());
        }
        if let Some(e) = &update.error_message {
            ev = ev.with_field("error", e.clone());
        }
        self.logger.log(ev);
    }

    fn log_results_locally(&self, results: &JobResults) {
        self.metrics.inc_results_local();
        self.logger.log(
            LogEvent::new(LogLevel::Info, "results.local")
                .with_job(results.job_id.clone())
                .with_field("benchmark_id", results.benchmark_id.clone())
                .with_field("model_name", results.model_name.clone())
                .with_field(
                    "overall_score",
                    results
                        .overall_score
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "n/a".to_string()),
                )
                .with_field("examples", results.num_examples_evaluated.to_string())
                .with_field("duration_s", format!("{:.2}", results.duration_seconds))
                .with_field("metrics", results.results.len().to_string()),
        );
    }
}

#[async_trait]
impl StatusReporter for SidecarReporter {
    async fn report_status(&self, update: &JobStatusUpdate) {
        self.check_sequence(update);

        if let Some(base) = &self.sidecar_url {
            match self.post_json(base, STATUS_PATH, update, STATUS_TIMEOUT).await {
                Ok(()) => {
                    self.metrics.inc_status_sent();
                    self.logger.log(
                        LogEvent::new(LogLevel::Debug, "status.sent")
                            .with_job(self.job_id.clone())
                            .with_field("status", update.status.as_str()),
                    );
                    return;
                }
                Err(e) => {
                    self.metrics.inc_status_failed();
                    self.logger.log(
                        LogEvent::new(LogLevel::Warn, "status.report.failed")
                            .with_job(self.job_id.clone())
                            .with_field("error", e.to_string()),
                    );
                }
            }
        }

        self.log_status_locally(update);
    }
}

#[async_trait]
impl ResultReporter for SidecarReporter {
    async fn report_results(&self, results: &JobResults) {
        if let Some(base) = &self.sidecar_url {
            match self
                .post_json(base, RESULTS_PATH, results, RESULTS_TIMEOUT)
                .await
            {
                Ok(()) => {
                    self.metrics.inc_results_sent();
                    self.logger.log(
                        LogEvent::new(LogLevel::Info, "results.sent")
                            .with_job(results.job_id.clone()),
                    );
                    return;
                }
                Err(e) => {
                    self.metrics.inc_results_failed();
                    self.logger.log(
                        LogEvent::new(LogLevel::Warn, "results.report.failed")
                            .with_job(results.job_id.clone())
                            .with_field("error", e.to_string()),
                    );
                }
            }
        }

        self.log_results_locally(results);
    }
}

pub type SharedStatusReporter = Arc<dyn StatusReporter>;
pub type SharedResultReporter = Arc<dyn ResultReporter>;
