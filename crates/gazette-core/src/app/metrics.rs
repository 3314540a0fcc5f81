//! Generation metrics (success/failure counters and average duration).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters updated by the workers. Lock-free; read through [`snapshot`].
///
/// [`snapshot`]: GenerationMetrics::snapshot
#[derive(Debug, Default)]
pub struct GenerationMetrics {
    successful: AtomicU64,
    failed: AtomicU64,
    /// Sum of successful generation durations, in microseconds.
    success_micros: AtomicU64,
}

impl GenerationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.success_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let micros = self.success_micros.load(Ordering::Relaxed);
        let total = successful + failed;

        MetricsSnapshot {
            total,
            successful,
            failed,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            avg_duration_seconds: if successful == 0 {
                0.0
            } else {
                micros as f64 / successful as f64 / 1_000_000.0
            },
        }
    }
}

/// Point-in-time view of [`GenerationMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Finished attempts (successful + failed).
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// `successful / total`, 0 when nothing ran yet.
    pub success_rate: f64,
    /// Mean duration of successful generations.
    pub avg_duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_are_zero() {
        let snapshot = GenerationMetrics::new().snapshot();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.avg_duration_seconds, 0.0);
    }

    #[test]
    fn failure_only() {
        let metrics = GenerationMetrics::new();
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.success_rate, 0.0);
    }

    #[test]
    fn mixed_results() {
        let metrics = GenerationMetrics::new();
        metrics.record_success(Duration::from_secs(600));
        metrics.record_success(Duration::from_secs(900));
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.successful, 2);
        assert!((snapshot.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshot.avg_duration_seconds, 750.0);
    }

    #[test]
    fn snapshot_serializes_with_snake_case_fields() {
        let metrics = GenerationMetrics::new();
        metrics.record_success(Duration::from_secs(1));
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["success_rate"], 1.0);
        assert_eq!(json["avg_duration_seconds"], 1.0);
    }
}
