//! Run counters for the service facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::QueueStatus;

/// Lock-free run counters.
#[derive(Debug)]
pub struct RunMetrics {
    started: Instant,
    total_runs: AtomicU64,
    successful_runs: AtomicU64,
    failed_runs: AtomicU64,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            total_runs: AtomicU64::new(0),
            successful_runs: AtomicU64::new(0),
            failed_runs: AtomicU64::new(0),
        }
    }
}

/// Serializable view of [`RunMetrics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Requests received.
    pub total_runs: u64,
    /// Requests that produced a result.
    pub successful_runs: u64,
    /// Requests that failed.
    pub failed_runs: u64,
    /// `successful / total` as a percentage string, e.g. `"66.67%"`.
    pub success_rate: String,
    /// Seconds since the counters were created.
    pub uptime_secs: f64,
    /// Queue state at snapshot time.
    pub queue: QueueStatus,
}

impl RunMetrics {
    /// Count a new request.
    pub fn record_start(&self) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a successful request.
    pub fn record_success(&self) {
        self.successful_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed request.
    pub fn record_failure(&self) {
        self.failed_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Seconds since creation.
    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Snapshot the counters alongside `queue`.
    pub fn snapshot(&self, queue: QueueStatus) -> MetricsSnapshot {
        let total_runs = self.total_runs.load(Ordering::Relaxed);
        let successful_runs = self.successful_runs.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_runs,
            successful_runs,
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
            success_rate: success_rate(successful_runs, total_runs),
            uptime_secs: self.uptime_secs(),
            queue,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn success_rate(successful: u64, total: u64) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.2}%", successful as f64 / total as f64 * 100.0)
}
