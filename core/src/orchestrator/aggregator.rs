//! Result aggregation from multiple workers

use std::time::Duration;

use serde::Serialize;

use crate::metrics::{LatencyHistogram, LatencyPercentiles};
use crate::worker::WorkerReport;

/// Aggregated statistics from all workers of a pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    /// Workers that returned a report
    pub total_workers: usize,

    /// Total successful operations
    pub total_operations: u64,

    /// Total tolerated errors
    pub total_errors: u64,

    /// Total records modified
    pub total_modified: u64,

    /// Total bytes inserted
    pub total_bytes_written: u64,

    /// Total records read
    pub total_records_read: u64,

    /// Maximum duration across all workers
    #[serde(with = "humantime_serde")]
    pub total_duration: Duration,

    /// Overall operations per second
    pub operations_per_second: f64,

    /// Operation latency in milliseconds
    pub latency: LatencyPercentiles,
}

impl AggregatedStats {
    /// Total operations (successful + errors)
    pub fn total_attempts(&self) -> u64 {
        self.total_operations + self.total_errors
    }

    /// Success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempts();
        if total > 0 {
            self.total_operations as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Aggregate reports from multiple workers
pub fn aggregate_worker_reports(reports: &[WorkerReport]) -> AggregatedStats {
    if reports.is_empty() {
        return AggregatedStats::default();
    }

    let total_operations: u64 = reports.iter().map(|r| r.operations).sum();
    let total_errors: u64 = reports.iter().map(|r| r.errors).sum();
    let total_modified: u64 = reports.iter().map(|r| r.modified).sum();
    let total_bytes_written: u64 = reports.iter().map(|r| r.bytes_written).sum();
    let total_records_read: u64 = reports.iter().map(|r| r.records_read).sum();

    // Use the maximum elapsed time across all workers
    let total_duration = reports
        .iter()
        .filter_map(|r| r.elapsed())
        .max()
        .unwrap_or(Duration::ZERO);

    let secs = total_duration.as_secs_f64();
    let operations_per_second = if secs > 0.0 {
        total_operations as f64 / secs
    } else {
        0.0
    };

    let mut latency = LatencyHistogram::new();
    for report in reports {
        latency.merge(&report.latency);
    }

    AggregatedStats {
        total_workers: reports.len(),
        total_operations,
        total_errors,
        total_modified,
        total_bytes_written,
        total_records_read,
        total_duration,
        operations_per_second,
        latency: latency.percentiles(),
    }
}
