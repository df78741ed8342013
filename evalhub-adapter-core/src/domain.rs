use crate::settings::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub type JobId = String;
pub type BenchmarkId = String;
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Stages of the fixed job lifecycle, ordered by declaration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Initializing,
    LoadingData,
    RunningEvaluation,
    PostProcessing,
    PersistingArtifacts,
}

impl JobPhase {
    pub const ALL: [JobPhase; 5] = [
        Self::Initializing,
        Self::LoadingData,
        Self::RunningEvaluation,
        Self::PostProcessing,
        Self::PersistingArtifacts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::LoadingData => "loading_data",
            Self::RunningEvaluation => "running_evaluation",
            Self::PostProcessing => "post_processing",
            Self::PersistingArtifacts => "persisting_artifacts",
        }
    }

    pub fn next(&self) -> Option<JobPhase> {
        let idx = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub url: String,
    pub name: String,
}

fn default_timeout_seconds() -> Option<u64> {
    Some(3600)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    pub job_id: JobId,
    pub benchmark_id: BenchmarkId,
    pub model: ModelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_examples: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_few_shot: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
    #[serde(default)]
    pub benchmark_config: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: Option<u64>,
}

impl JobSpec {
    /// Loads the job description mounted for this run.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::JobSpecNotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidJobSpec {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidJobSpec {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::InvalidJobSpec {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("progress {0} is outside [0.0, 1.0]")]
pub struct InvalidProgress(pub f64);

fn check_progress(progress: f64) -> Result<f64, InvalidProgress> {
    if (0.0..=1.0).contains(&progress) {
        Ok(progress)
    } else {
        Err(InvalidProgress(progress))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawStatusUpdate")]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<JobPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<JsonMap>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawStatusUpdate {
    status: JobStatus,
    #[serde(default)]
    phase: Option<JobPhase>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    current_step: Option<String>,
    #[serde(default)]
    total_steps: Option<u32>,
    #[serde(default)]
    completed_steps: Option<u32>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error_details: Option<JsonMap>,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl TryFrom<RawStatusUpdate> for JobStatusUpdate {
    type Error = InvalidProgress;

    fn try_from(raw: RawStatusUpdate) -> Result<Self, Self::Error> {
        let progress = raw.progress.map(check_progress).transpose()?;
        Ok(Self {
            status: raw.status,
            phase: raw.phase,
            progress,
            message: raw.message,
            current_step: raw.current_step,
            total_steps: raw.total_steps,
            completed_steps: raw.completed_steps,
            error_message: raw.error_message,
            error_details: raw.error_details,
            timestamp: raw.timestamp,
        })
    }
}

impl JobStatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            phase: None,
            progress: None,
            message: None,
            current_step: None,
            total_steps: None,
            completed_steps: None,
            error_message: None,
            error_details: None,
            timestamp: Utc::now(),
        }
    }

    /// A `running` update entering `phase`.
    pub fn running(phase: JobPhase, progress: f64) -> Result<Self, InvalidProgress> {
        Self::new(JobStatus::Running)
            .with_phase(phase)
            .with_progress(progress)
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        let mut update = Self::new(JobStatus::Failed);
        update.error_message = Some(error_message.into());
        update
    }

    pub fn progress(&self) -> Option<f64> {
        self.progress
    }

    pub fn with_phase(mut self, phase: JobPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Result<Self, InvalidProgress> {
        self.progress = Some(check_progress(progress)?);
        Ok(self)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_steps(mut self, current_step: impl Into<String>, completed: u32, total: u32) -> Self {
        self.current_step = Some(current_step.into());
        self.completed_steps = Some(completed);
        self.total_steps = Some(total);
        self
    }

    pub fn with_error_details(mut self, details: JsonMap) -> Self {
        self.error_details = Some(details);
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OCIArtifactSpec {
    pub files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub job_id: JobId,
    pub benchmark_id: BenchmarkId,
    pub model_name: String,
}

impl OCIArtifactSpec {
    pub fn new(
        files: Vec<PathBuf>,
        job_id: impl Into<JobId>,
        benchmark_id: impl Into<BenchmarkId>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            files,
            base_path: None,
            title: None,
            description: None,
            annotations: HashMap::new(),
            job_id: job_id.into(),
            benchmark_id: benchmark_id.into(),
            model_name: model_name.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OCIArtifactResult {
    pub digest: String,
    pub reference: String,
    pub size_bytes: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }
}

fn default_metric_type() -> String {
    "float".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub metric_name: String,
    pub metric_value: MetricValue,
    #[serde(default = "default_metric_type")]
    pub metric_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_samples: Option<u64>,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl EvaluationResult {
    pub fn new(metric_name: impl Into<String>, metric_value: MetricValue) -> Self {
        Self {
            metric_name: metric_name.into(),
            metric_value,
            metric_type: default_metric_type(),
            confidence_interval: None,
            num_samples: None,
            metadata: JsonMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JobResults {
    pub job_id: JobId,
    pub benchmark_id: BenchmarkId,
    pub model_name: String,
    pub results: Vec<EvaluationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    pub num_examples_evaluated: u64,
    pub duration_seconds: f64,
    #[serde(default = "Utc::now")]
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub evaluation_metadata: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci_artifact: Option<OCIArtifactResult>,
}
