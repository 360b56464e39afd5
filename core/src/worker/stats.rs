//! Worker statistics tracking

use std::time::{Duration, Instant};

use crate::metrics::LatencyHistogram;

/// What one worker did during one pass
#[derive(Debug, Default, Clone)]
pub struct WorkerReport {
    /// Successful operations
    pub operations: u64,

    /// Failed operations the worker chose to tolerate
    pub errors: u64,

    /// Records changed by updates
    pub modified: u64,

    /// Encoded bytes of inserted records
    pub bytes_written: u64,

    /// Records returned by reads
    pub records_read: u64,

    /// Per-operation latency
    pub latency: LatencyHistogram,

    /// Worker start time
    pub started_at: Option<Instant>,

    /// Worker end time
    pub ended_at: Option<Instant>,
}

impl WorkerReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Successful plus failed operations
    pub fn total_operations(&self) -> u64 {
        self.operations + self.errors
    }

    /// Elapsed time since start
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Successful operations per second
    pub fn ops_per_second(&self) -> f64 {
        self.elapsed()
            .map(|d| {
                let secs = d.as_secs_f64();
                if secs > 0.0 {
                    self.operations as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0)
    }

    /// Record a successful operation
    pub fn record_success(&mut self, latency: Duration) {
        self.operations += 1;
        self.latency.record(latency);
    }

    /// Record a failed operation
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Add to the modified count
    pub fn add_modified(&mut self, n: u64) {
        self.modified += n;
    }

    /// Add to the written byte count
    pub fn add_bytes(&mut self, n: usize) {
        self.bytes_written += n as u64;
    }

    /// Add to the read record count
    pub fn add_read(&mut self, n: usize) {
        self.records_read += n as u64;
    }

    /// Merge counts from another worker
    ///
    /// Timestamps widen to cover both reports.
    pub fn merge(&mut self, other: &WorkerReport) {
        self.operations += other.operations;
        self.errors += other.errors;
        self.modified += other.modified;
        self.bytes_written += other.bytes_written;
        self.records_read += other.records_read;
        self.latency.merge(&other.latency);

        self.started_at = match (self.started_at, other.started_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.ended_at = match (self.ended_at, other.ended_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}
