use crate::adapter::FrameworkAdapter;
use crate::callbacks::JobCallbacks;
use crate::domain::{JobResults, JobSpec, JobStatusUpdate};
use crate::logging::{LogEvent, LogLevel, SharedEventLogger};
use crate::metrics::{InMemoryCallbackMetrics, SharedMetrics};
use crate::reporter::SharedResultReporter;
use crate::settings::AdapterSettings;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
enum Wiring {
    Fixed {
        callbacks: JobCallbacks,
        results: SharedResultReporter,
    },
    Settings,
}

/// Runs a single job through an adapter and delivers its results exactly
/// once. Callbacks are either supplied up front or built per job from
/// settings.
#[derive(Clone)]
pub struct AdapterRunner {
    wiring: Wiring,
    settings: AdapterSettings,
    logger: SharedEventLogger,
    metrics: SharedMetrics,
    report_failures: bool,
}

impl AdapterRunner {
    pub fn new(callbacks: JobCallbacks, results: SharedResultReporter) -> Self {
        Self {
            logger: callbacks.logger.clone(),
            metrics: callbacks.metrics.clone(),
            wiring: Wiring::Fixed { callbacks, results },
            settings: AdapterSettings::default(),
            report_failures: false,
        }
    }

    pub fn from_settings(settings: &AdapterSettings, logger: SharedEventLogger) -> Self {
        Self {
            wiring: Wiring::Settings,
            settings: settings.clone(),
            logger,
            metrics: Arc::new(InMemoryCallbackMetrics::new()),
            report_failures: false,
        }
    }

    /// Emit one FAILED status update before propagating an adapter error.
    pub fn with_failure_reporting(mut self, enabled: bool) -> Self {
        self.report_failures = enabled;
        self
    }

    /// Settings consulted by `load_and_run` (and for wiring, when the runner
    /// was built from settings).
    pub fn with_settings(mut self, settings: AdapterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        if let Wiring::Fixed { callbacks, .. } = &mut self.wiring {
            callbacks.metrics = metrics.clone();
        }
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    fn wire(&self, spec: &JobSpec) -> anyhow::Result<(JobCallbacks, SharedResultReporter)> {
        match &self.wiring {
            Wiring::Fixed { callbacks, results } => Ok((callbacks.clone(), results.clone())),
            Wiring::Settings => {
                let (callbacks, reporter) = JobCallbacks::with_sidecar(
                    &self.settings,
                    spec.job_id.clone(),
                    self.logger.clone(),
                    self.metrics.clone(),
                )?;
                let results: SharedResultReporter = reporter;
                Ok((callbacks, results))
            }
        }
    }

    pub async fn run(
        &self,
        adapter: &dyn FrameworkAdapter,
        spec: &JobSpec,
    ) -> anyhow::Result<JobResults> {
        let (callbacks, results_reporter) = self.wire(spec)?;
        self.logger.log(
            LogEvent::new(LogLevel::Info, "job.started")
                .with_job(spec.job_id.clone())
                .with_field("benchmark_id", spec.benchmark_id.clone())
                .with_field("model", spec.model.name.clone()),
        );
        let started = Instant::now();

        match adapter.run_benchmark_job(spec, &callbacks).await {
            Ok(results) => {
                results_reporter.report_results(&results).await;
                self.logger.log(
                    LogEvent::new(LogLevel::Info, "job.finished")
                        .with_job(spec.job_id.clone())
                        .with_field("elapsed_ms", started.elapsed().as_millis().to_string()),
                );
                Ok(results)
            }
            Err(e) => {
                self.logger.log(
                    LogEvent::new(LogLevel::Error, "job.failed")
                        .with_job(spec.job_id.clone())
                        .with_field("error", format!("{e:#}")),
                );
                if self.report_failures {
                    callbacks
                        .report_status(JobStatusUpdate::failed(format!("{e:#}")))
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Validates the runner's settings, loads the job spec they point at and
    /// runs it. Configuration problems fail before the adapter is called.
    pub async fn load_and_run(
        &self,
        adapter: &dyn FrameworkAdapter,
    ) -> anyhow::Result<JobResults> {
        self.settings.validate_runtime()?;
        let spec = JobSpec::from_file(self.settings.resolved_job_spec_path())?;
        self.run(adapter, &spec).await
    }
}

pub fn exit_code<T>(result: &anyhow::Result<T>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
