mod simple;

use clap::Parser;
use evalhub_adapter_core::logging::{
    LogEvent, LogLevel, SharedEventLogger, StderrEventLogger,
};
use evalhub_adapter_core::runner::{exit_code, AdapterRunner};
use evalhub_adapter_core::settings::AdapterSettings;
use simple::SimpleAdapter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "evalhub-simple-adapter", about = "Reference EvalHub benchmark adapter")]
pub struct Cli {
    /// Job spec path; overrides EVALHUB_JOB_SPEC_PATH.
    #[arg(long)]
    pub job_spec: Option<PathBuf>,
    /// Where result files are written before they are persisted.
    #[arg(long, default_value = "job_results")]
    pub output_dir: PathBuf,
    #[arg(long, default_value = "info")]
    pub log_level: LogLevel,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let logger: SharedEventLogger = Arc::new(StderrEventLogger::new(cli.log_level));
    let outcome = run(cli, logger.clone()).await;
    if let Err(e) = &outcome {
        logger.log(LogEvent::new(LogLevel::Error, "adapter.exit").with_field("error", format!("{e:#}")));
    }
    exit_code(&outcome)
}

async fn run(cli: Cli, logger: SharedEventLogger) -> anyhow::Result<()> {
    let mut settings = AdapterSettings::from_env()?;
    if let Some(path) = cli.job_spec {
        settings = settings.with_job_spec_path(path);
    }
    logger.log(
        LogEvent::new(LogLevel::Info, "adapter.config")
            .with_field("mode", format!("{:?}", settings.mode))
            .with_field("job_spec", settings.resolved_job_spec_path().display().to_string())
            .with_field("sidecar", settings.service_url.clone().unwrap_or_else(|| "none".to_string())),
    );

    let runner = AdapterRunner::from_settings(&settings, logger.clone());
    let adapter = SimpleAdapter::new(cli.output_dir);
    let results = runner.load_and_run(&adapter).await?;

    logger.log(
        LogEvent::new(LogLevel::Info, "adapter.done")
            .with_job(results.job_id.clone())
            .with_field(
                "overall_score",
                results
                    .overall_score
                    .map_or_else(|| "n/a".to_string(), |s| format!("{s:.4}")),
            )
            .with_field(
                "artifact",
                results
                    .oci_artifact
                    .as_ref()
                    .map_or_else(|| "none".to_string(), |a| a.reference.clone()),
            ),
    );
    Ok(())
}
