//! Cluster lifecycle types and the reconciler trait
//!
//! The trait is defined here so the orchestrator does not depend on the
//! control-plane client. Implementations live in `unibench-cluster`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name used when a suite does not name its cluster
pub const DEFAULT_CLUSTER_NAME: &str = "UniBenchTemp";

/// Oplog size applied after a cluster is created
pub const DEFAULT_OPLOG_SIZE_MB: u64 = 12_345;

// ============================================================================
// Desired state
// ============================================================================

/// Desired cluster configuration
///
/// Reconciliation never diffs two specs: any `ensure_present` against an
/// existing cluster re-applies the whole spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterSpec {
    /// Cluster name
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Instance tier, e.g. `M30`
    #[serde(alias = "atlasInstanceType", alias = "instanceSize")]
    pub tier: String,

    /// Volume type, e.g. `STANDARD` or `PROVISIONED`
    #[serde(default = "default_disk_type", alias = "atlasDiskType")]
    pub disk_type: String,

    /// Disk size in GB
    #[serde(default = "default_disk_size", alias = "atlasDiskSizeGB", rename = "diskSizeGB")]
    pub disk_size_gb: u32,

    /// Provisioned IOPS
    #[serde(default = "default_iops", alias = "atlasIOPS", rename = "diskIOPS")]
    pub iops: u32,

    /// Cloud provider
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Provider region
    #[serde(default = "default_region")]
    pub region: String,

    /// Replica set members
    #[serde(default = "default_node_count")]
    pub node_count: u32,

    /// Server major version
    #[serde(default = "default_major_version", rename = "mongoDBMajorVersion")]
    pub major_version: String,

    /// Oplog size set after creation; `None` skips the follow-up patch
    #[serde(default = "default_oplog_size", rename = "oplogSizeMB")]
    pub oplog_size_mb: Option<u64>,
}

fn default_cluster_name() -> String {
    DEFAULT_CLUSTER_NAME.to_string()
}

fn default_disk_type() -> String {
    "STANDARD".to_string()
}

fn default_disk_size() -> u32 {
    60
}

fn default_iops() -> u32 {
    3000
}

fn default_provider() -> String {
    "AWS".to_string()
}

fn default_region() -> String {
    "EU_WEST_1".to_string()
}

fn default_node_count() -> u32 {
    3
}

fn default_major_version() -> String {
    "8.0".to_string()
}

fn default_oplog_size() -> Option<u64> {
    Some(DEFAULT_OPLOG_SIZE_MB)
}

impl ClusterSpec {
    /// Spec with defaults for everything but name and tier
    pub fn new(name: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tier: tier.into(),
            disk_type: default_disk_type(),
            disk_size_gb: default_disk_size(),
            iops: default_iops(),
            provider: default_provider(),
            region: default_region(),
            node_count: default_node_count(),
            major_version: default_major_version(),
            oplog_size_mb: default_oplog_size(),
        }
    }

    /// Stack a sparse per-variant override onto this spec
    pub fn with_override(&self, o: &ClusterOverride) -> ClusterSpec {
        let mut spec = self.clone();
        if let Some(tier) = &o.tier {
            spec.tier = tier.clone();
        }
        if let Some(disk_type) = &o.disk_type {
            spec.disk_type = disk_type.clone();
        }
        if let Some(size) = o.disk_size_gb {
            spec.disk_size_gb = size;
        }
        if let Some(iops) = o.iops {
            spec.iops = iops;
        }
        spec
    }
}

/// Sparse cluster settings carried by a variant's `instance` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterOverride {
    /// Instance tier
    #[serde(default, alias = "atlasInstanceType", skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,

    /// Volume type
    #[serde(default, alias = "atlasDiskType", skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,

    /// Disk size in GB
    #[serde(
        default,
        rename = "diskSizeGB",
        alias = "atlasDiskSizeGB",
        skip_serializing_if = "Option::is_none"
    )]
    pub disk_size_gb: Option<u32>,

    /// Provisioned IOPS
    #[serde(
        default,
        rename = "diskIOPS",
        alias = "atlasIOPS",
        skip_serializing_if = "Option::is_none"
    )]
    pub iops: Option<u32>,
}

// ============================================================================
// Observed state
// ============================================================================

/// Remote cluster state, derived from a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    /// The control plane does not know the cluster
    Absent,
    /// The cluster exists but is not idle
    Provisioning,
    /// The cluster exists and is idle
    Ready,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterState::Absent => "absent",
            ClusterState::Provisioning => "provisioning",
            ClusterState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// What a reconciliation call did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Issued a create
    Created,
    /// Issued a modify against an existing cluster
    Modified,
    /// Issued a delete
    Deleted,
    /// Nothing to delete
    AlreadyAbsent,
}

/// Result of a reconciliation call
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    /// State observed when the call returned
    pub state: ClusterState,
    /// Mutation that was issued
    pub action: ReconcileAction,
    /// Non-fatal failures, such as a rejected follow-up patch
    pub warnings: Vec<String>,
    /// Probes issued while waiting
    pub probes: u32,
}

/// Polling cadence for `await_state`
///
/// Each wait precedes its probe: the first wait is `first_wait`, later ones
/// `steady_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PollPolicy {
    /// Wait before the first probe
    #[serde(with = "humantime_serde")]
    pub first_wait: Duration,

    /// Wait before each later probe
    #[serde(with = "humantime_serde")]
    pub steady_wait: Duration,

    /// Probes before giving up
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            first_wait: Duration::from_secs(10),
            steady_wait: Duration::from_secs(30),
            max_attempts: 100,
        }
    }
}

impl PollPolicy {
    /// Wait before probe number `attempt` (1-based)
    pub fn wait_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.first_wait
        } else {
            self.steady_wait
        }
    }
}

/// Measurements for the cluster's primary over a time window
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsBundle {
    /// Process id of the primary
    pub process_id: String,
    /// Process measurements as returned by the control plane
    pub measurements: serde_json::Value,
    /// Data disk measurements
    pub disk_metrics: serde_json::Value,
}

// ============================================================================
// Errors
// ============================================================================

/// Control-plane errors
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// HTTP/network error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the API
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The desired state was not observed within the attempt bound
    #[error("cluster {name} not {desired} after {attempts} probes")]
    Timeout {
        /// Cluster name
        name: String,
        /// State that was awaited
        desired: ClusterState,
        /// Probes issued
        attempts: u32,
    },

    /// No primary process could be located for the cluster
    #[error("primary process not found for cluster {0}")]
    PrimaryNotFound(String),

    /// Response body could not be decoded
    #[error("unexpected response: {0}")]
    Decode(String),

    /// Missing credentials or settings
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    /// Whether a probe failing with this error may be retried inside polling
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Http(_) => true,
            ClusterError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

// ============================================================================
// Reconciler trait
// ============================================================================

/// Drives a remote cluster to a desired state
#[async_trait]
pub trait ClusterReconciler: Send + Sync {
    /// Create or re-apply `spec`, then block until the cluster is ready
    async fn ensure_present(&self, spec: &ClusterSpec) -> Result<ReconcileOutcome, ClusterError>;

    /// Delete the cluster if it exists, then block until it is gone
    async fn ensure_absent(&self, name: &str) -> Result<ReconcileOutcome, ClusterError>;

    /// Single status check
    async fn probe(&self, name: &str) -> Result<ClusterState, ClusterError>;

    /// Primary-process measurements for `[start, end]`
    async fn fetch_metrics_window(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricsBundle, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_defaults_from_minimal_json() {
        let spec: ClusterSpec = serde_json::from_value(json!({"atlasInstanceType": "M40"})).unwrap();

        assert_eq!(spec.name, DEFAULT_CLUSTER_NAME);
        assert_eq!(spec.tier, "M40");
        assert_eq!(spec.disk_size_gb, 60);
        assert_eq!(spec.iops, 3000);
        assert_eq!(spec.oplog_size_mb, Some(DEFAULT_OPLOG_SIZE_MB));
    }

    #[test]
    fn test_spec_rejects_unknown_keys() {
        let err = serde_json::from_value::<ClusterSpec>(json!({"tier": "M40", "diskSizeGb": 500}))
            .unwrap_err();
        assert!(err.to_string().contains("diskSizeGb"));
    }

    #[test]
    fn test_override_is_sparse() {
        let base = ClusterSpec::new("bench", "M30");
        let o: ClusterOverride =
            serde_json::from_value(json!({"atlasInstanceType": "M50", "atlasIOPS": 6000})).unwrap();
        let spec = base.with_override(&o);

        assert_eq!(spec.tier, "M50");
        assert_eq!(spec.iops, 6000);
        assert_eq!(spec.disk_size_gb, base.disk_size_gb);
        assert_eq!(spec.name, "bench");
    }

    #[test]
    fn test_poll_policy_humantime() {
        let policy: PollPolicy = serde_json::from_value(json!({
            "firstWait": "5s",
            "steadyWait": "1m",
            "maxAttempts": 3
        }))
        .unwrap();

        assert_eq!(policy.wait_before(1), Duration::from_secs(5));
        assert_eq!(policy.wait_before(2), Duration::from_secs(60));
        assert_eq!(policy.max_attempts, 3);
    }
}
