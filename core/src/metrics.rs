//! Result records and latency percentile calculation

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cluster::MetricsBundle;
use crate::orchestrator::AggregatedStats;

/// Finished metrics and configuration for one measured pass
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    /// Workload file stem
    pub test_name: String,
    /// Suite label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite_name: Option<String>,
    /// Variant label
    pub variant_name: String,
    /// Variant document as written
    pub variant: serde_json::Map<String, Value>,
    /// When workers were submitted
    pub start_time: DateTime<Utc>,
    /// When the last worker finished
    pub end_time: DateTime<Utc>,
    /// Wall-clock pass duration in milliseconds
    pub duration_ms: u64,
    /// Workers in the pass
    pub thread_count: usize,
    /// Workers that returned an error or panicked
    pub worker_failures: usize,
    /// Server status before the pass
    pub before_status: Value,
    /// Server status after the pass
    pub after_status: Value,
    /// Primary-process measurements, when a cluster is managed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsBundle>,
    /// Merged worker statistics
    pub stats: AggregatedStats,
    /// Resolved workload configuration
    pub test_config: Value,
    /// Suite document as written
    pub bench_config: Value,
}

impl ResultRecord {
    /// Stable key: the variant's fields plus `testname`, sorted by name
    pub fn identity(&self) -> Value {
        let mut key: BTreeMap<String, Value> = self
            .variant
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        key.insert("testname".to_string(), Value::String(self.test_name.clone()));
        Value::Object(key.into_iter().collect())
    }

    /// File-name friendly form of the identity
    pub fn slug(&self) -> String {
        let raw = format!("{}-{}", self.test_name, self.variant_name);
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

/// Latency percentiles (all values in milliseconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct LatencyPercentiles {
    /// Minimum value
    pub min: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
    /// Standard deviation
    pub stddev: f64,
}

impl LatencyPercentiles {
    /// Calculate percentiles from a slice of values
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted: Vec<f64> = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let len = sorted.len();
        let mean = sorted.iter().sum::<f64>() / len as f64;
        let variance = if len > 1 {
            sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (len - 1) as f64
        } else {
            0.0
        };

        Self {
            min: sorted[0],
            p50: percentile(&sorted, 0.50),
            p90: percentile(&sorted, 0.90),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            max: sorted[len - 1],
            mean,
            stddev: variance.sqrt(),
        }
    }
}

/// Percentile of sorted values using linear interpolation
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let idx = p * (len - 1) as f64;
            let lower = idx.floor() as usize;
            let upper = (idx.ceil() as usize).min(len - 1);
            let frac = idx - lower as f64;
            sorted[lower] * (1.0 - frac) + sorted[upper] * frac
        }
    }
}

/// Per-operation latency histogram
///
/// Microsecond precision, up to one hour per operation.
#[derive(Clone)]
pub struct LatencyHistogram {
    histogram: hdrhistogram::Histogram<u64>,
}

impl LatencyHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000_000, 3)
            .expect("static histogram bounds are valid");
        Self { histogram }
    }

    /// Record one operation
    pub fn record(&mut self, duration: Duration) {
        let micros = (duration.as_micros() as u64).max(1);
        let _ = self.histogram.record(micros);
    }

    /// Number of recorded operations
    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Fold another histogram into this one
    pub fn merge(&mut self, other: &LatencyHistogram) {
        let _ = self.histogram.add(&other.histogram);
    }

    /// Percentiles in milliseconds
    pub fn percentiles(&self) -> LatencyPercentiles {
        if self.histogram.is_empty() {
            return LatencyPercentiles::default();
        }

        LatencyPercentiles {
            min: self.histogram.min() as f64 / 1000.0,
            p50: self.histogram.value_at_quantile(0.50) as f64 / 1000.0,
            p90: self.histogram.value_at_quantile(0.90) as f64 / 1000.0,
            p95: self.histogram.value_at_quantile(0.95) as f64 / 1000.0,
            p99: self.histogram.value_at_quantile(0.99) as f64 / 1000.0,
            max: self.histogram.max() as f64 / 1000.0,
            mean: self.histogram.mean() / 1000.0,
            stddev: self.histogram.stdev() / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyHistogram")
            .field("len", &self.len())
            .finish()
    }
}
