use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub status_sent: u64,
    pub status_failed: u64,
    pub status_local: u64,
    pub results_sent: u64,
    pub results_failed: u64,
    pub results_local: u64,
    pub artifacts_persisted: u64,
    pub artifact_failures: u64,
    pub bytes_persisted: u64,
}

pub trait CallbackMetrics: Send + Sync {
    fn inc_status_sent(&self);
    fn inc_status_failed(&self);
    fn inc_status_local(&self);
    fn inc_results_sent(&self);
    fn inc_results_failed(&self);
    fn inc_results_local(&self);
    fn record_artifact_persisted(&self, size_bytes: u64);
    fn inc_artifact_failure(&self);
    fn snapshot(&self) -> MetricsSnapshot;
}

pub type SharedMetrics = Arc<dyn CallbackMetrics>;

#[derive(Default)]
pub struct InMemoryCallbackMetrics {
    status_sent: AtomicU64,
    status_failed: AtomicU64,
    status_local: AtomicU64,
    results_sent: AtomicU64,
    results_failed: AtomicU64,
    results_local: AtomicU64,
    artifacts_persisted: AtomicU64,
    artifact_failures: AtomicU64,
    bytes_persisted: AtomicU64,
}

impl InMemoryCallbackMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CallbackMetrics for InMemoryCallbackMetrics {
    fn inc_status_sent(&self) {
        self.status_sent.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_status_failed(&self) {
        self.status_failed.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_status_local(&self) {
        self.status_local.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_results_sent(&self) {
        self.results_sent.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_results_failed(&self) {
        self.results_failed.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_results_local(&self) {
        self.results_local.fetch_add(1, Ordering::Relaxed);
    }
    fn record_artifact_persisted(&self, size_bytes: u64) {
        self.artifacts_persisted.fetch_add(1, Ordering::Relaxed);
        self.bytes_persisted.fetch_add(size_bytes, Ordering::Relaxed);
    }
    fn inc_artifact_failure(&self) {
        self.artifact_failures.fetch_add(1, Ordering::Relaxed);
    }
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            status_sent: self.status_sent.load(Ordering::Relaxed),
            status_failed: self.status_failed.load(Ordering::Relaxed),
            status_local: self.status_local.load(Ordering::Relaxed),
            results_sent: self.results_sent.load(Ordering::Relaxed),
            results_failed: self.results_failed.load(Ordering::Relaxed),
            results_local: self.results_local.load(Ordering::Relaxed),
            artifacts_persisted: self.artifacts_persisted.load(Ordering::Relaxed),
            artifact_failures: self.artifact_failures.load(Ordering::Relaxed),
            bytes_persisted: self.bytes_persisted.load(Ordering::Relaxed),
        }
    }
}
