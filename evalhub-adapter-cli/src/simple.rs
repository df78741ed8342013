use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use evalhub_adapter_core::adapter::FrameworkAdapter;
use evalhub_adapter_core::callbacks::JobCallbacks;
use evalhub_adapter_core::domain::{
    EvaluationResult, JobPhase, JobResults, JobSpec, JobStatus, JobStatusUpdate, JsonMap,
    MetricValue, OCIArtifactSpec,
};
use evalhub_adapter_core::logging::{LogEvent, LogLevel};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Instant;

const DATASET_SIZE: u64 = 100;
const TOTAL_STEPS: u32 = 4;

/// Reference adapter: walks every phase against a synthetic dataset,
/// writes `results.json` and `summary.txt` and persists them.
pub struct SimpleAdapter {
    output_dir: PathBuf,
}

impl SimpleAdapter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn validate(config: &JobSpec) -> anyhow::Result<()> {
        if config.benchmark_id.trim().is_empty() {
            anyhow::bail!("benchmark_id is required");
        }
        if config.model.url.trim().is_empty() {
            anyhow::bail!("model.url is required");
        }
        if config.model.name.trim().is_empty() {
            anyhow::bail!("model.name is required");
        }
        Ok(())
    }

    fn evaluate(examples: u64) -> Vec<EvaluationResult> {
        let mut accuracy = EvaluationResult::new("accuracy", MetricValue::Float(0.85));
        accuracy.confidence_interval = Some((0.82, 0.88));
        accuracy.num_samples = Some(examples);

        let mut f1 = EvaluationResult::new("f1_score", MetricValue::Float(0.83));
        f1.num_samples = Some(examples);

        let mut latency = EvaluationResult::new("latency_ms", MetricValue::Float(125.5));
        if let serde_json::Value::Object(m) = json!({"p50": 100, "p95": 200, "p99": 250}) {
            latency.metadata = m;
        }
        vec![accuracy, f1, latency]
    }

    /// Mean of the metrics already on a 0..=1 scale.
    fn overall_score(results: &[EvaluationResult]) -> Option<f64> {
        let normalized: Vec<f64> = results
            .iter()
            .filter_map(|r| r.metric_value.as_f64())
            .filter(|v| *v <= 1.0)
            .collect();
        if normalized.is_empty() {
            return None;
        }
        Some(normalized.iter().sum::<f64>() / normalized.len() as f64)
    }

    async fn write_outputs(
        &self,
        dir: &Path,
        config: &JobSpec,
        results: &[EvaluationResult],
    ) -> anyhow::Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let results_file = dir.join("results.json");
        let body = json!({
            "job_id": config.job_id,
            "benchmark_id": config.benchmark_id,
            "results": results,
        });
        tokio::fs::write(&results_file, serde_json::to_vec_pretty(&body)?)
            .await
            .with_context(|| format!("writing {}", results_file.display()))?;

        let mut summary = format!(
            "Evaluation Results for {}\n{}\n\n",
            config.benchmark_id,
            "=".repeat(50)
        );
        for r in results {
            let value = match &r.metric_value {
                MetricValue::Bool(b) => b.to_string(),
                MetricValue::Int(i) => i.to_string(),
                MetricValue::Float(f) => f.to_string(),
                MetricValue::Text(s) => s.clone(),
            };
            summary.push_str(&format!("{}: {value}\n", r.metric_name));
            if let Some((lo, hi)) = r.confidence_interval {
                summary.push_str(&format!("  95% CI: ({lo}, {hi})\n"));
            }
        }
        let summary_file = dir.join("summary.txt");
        tokio::fs::write(&summary_file, summary)
            .await
            .with_context(|| format!("writing {}", summary_file.display()))?;

        Ok(vec![results_file, summary_file])
    }

    async fn run_phases(
        &self,
        config: &JobSpec,
        callbacks: &JobCallbacks,
    ) -> anyhow::Result<JobResults> {
        let started = Instant::now();

        callbacks
            .report_status(
                JobStatusUpdate::running(JobPhase::Initializing, 0.0)?
                    .with_message(format!("Initializing {} evaluation", config.benchmark_id)),
            )
            .await;
        Self::validate(config)?;

        callbacks
            .report_status(
                JobStatusUpdate::running(JobPhase::LoadingData, 0.1)?
                    .with_message("Loading benchmark data")
                    .with_steps("Loading dataset", 1, TOTAL_STEPS),
            )
            .await;
        let examples = config
            .num_examples
            .filter(|n| *n > 0)
            .map_or(DATASET_SIZE, |n| n.min(DATASET_SIZE));

        callbacks
            .report_status(
                JobStatusUpdate::running(JobPhase::RunningEvaluation, 0.3)?
                    .with_message(format!("Evaluating on {examples} examples"))
                    .with_steps("Running evaluation", 2, TOTAL_STEPS),
            )
            .await;
        let results = Self::evaluate(examples);

        callbacks
            .report_status(
                JobStatusUpdate::running(JobPhase::PostProcessing, 0.8)?
                    .with_message("Processing results")
                    .with_steps("Post-processing", 3, TOTAL_STEPS),
            )
            .await;
        let overall_score = Self::overall_score(&results);
        let job_dir = self.output_dir.join(&config.job_id);
        let files = self.write_outputs(&job_dir, config, &results).await?;

        callbacks
            .report_status(
                JobStatusUpdate::running(JobPhase::PersistingArtifacts, 0.9)?
                    .with_message("Persisting artifacts")
                    .with_steps("Creating OCI artifact", 4, TOTAL_STEPS),
            )
            .await;
        let mut spec = OCIArtifactSpec::new(
            files,
            config.job_id.clone(),
            config.benchmark_id.clone(),
            config.model.name.clone(),
        );
        spec.base_path = Some(job_dir);
        spec.title = Some(format!("Evaluation results for {}", config.benchmark_id));
        spec.description = Some(format!("Results from job {}", config.job_id));
        spec.annotations.insert(
            "overall_score".to_string(),
            overall_score.map_or_else(|| "N/A".to_string(), |s| s.to_string()),
        );
        let artifact = callbacks.create_oci_artifact(&spec).await?;

        callbacks
            .report_status(
                JobStatusUpdate::new(JobStatus::Completed)
                    .with_progress(1.0)?
                    .with_message("Evaluation completed"),
            )
            .await;

        let mut metadata = JsonMap::new();
        metadata.insert("framework".to_string(), json!("simple_adapter"));
        metadata.insert("framework_version".to_string(), json!(env!("CARGO_PKG_VERSION")));
        metadata.insert("num_few_shot".to_string(), json!(config.num_few_shot));
        metadata.insert("random_seed".to_string(), json!(config.random_seed));
        metadata.insert(
            "benchmark_config".to_string(),
            serde_json::Value::Object(config.benchmark_config.clone()),
        );

        Ok(JobResults {
            job_id: config.job_id.clone(),
            benchmark_id: config.benchmark_id.clone(),
            model_name: config.model.name.clone(),
            results,
            overall_score,
            num_examples_evaluated: examples,
            duration_seconds: started.elapsed().as_secs_f64(),
            completed_at: Utc::now(),
            evaluation_metadata: metadata,
            oci_artifact: Some(artifact),
        })
    }
}

#[async_trait]
impl FrameworkAdapter for SimpleAdapter {
    async fn run_benchmark_job(
        &self,
        config: &JobSpec,
        callbacks: &JobCallbacks,
    ) -> anyhow::Result<JobResults> {
        callbacks.logger.log(
            LogEvent::new(LogLevel::Info, "adapter.start")
                .with_job(config.job_id.clone())
                .with_field("benchmark_id", config.benchmark_id.clone()),
        );
        match self.run_phases(config, callbacks).await {
            Ok(results) => Ok(results),
            Err(e) => {
                let mut details = JsonMap::new();
                details.insert("error_chain".to_string(), json!(format!("{e:#}")));
                callbacks
                    .report_status(JobStatusUpdate::failed(e.to_string()).with_error_details(details))
                    .await;
                Err(e)
            }
        }
    }
}
