use crate::callbacks::JobCallbacks;
use crate::domain::{JobResults, JobSpec};
use async_trait::async_trait;

/// The one operation a framework integration provides. Implementations
/// walk the job phases in order, reporting each through
/// `callbacks.report_status` before doing that phase's work, and return
/// the final results. Errors propagate to the runner unchanged.
#[async_trait]
pub trait FrameworkAdapter: Send + Sync {
    async fn run_benchmark_job(
        &self,
        config: &JobSpec,
        callbacks: &JobCallbacks,
    ) -> anyhow::Result<JobResults>;
}
