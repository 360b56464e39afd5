//! Core traits for workloads and result sinks
//!
//! These traits are defined in core to avoid circular dependencies.
//! Implementations live in their respective crates (workloads/, storage/).

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ConfigError, RunConfig};
use crate::metrics::ResultRecord;
use crate::store::{Namespace, RecordStore, StoreError};
use crate::worker::{WorkerContext, WorkerReport};

// ============================================================================
// Workload Trait
// ============================================================================

/// A pluggable benchmark unit
///
/// Per variant the orchestrator calls `generate_data` and `warm_cache` once
/// per workload, then `test_reset` once, then `run` once on every worker of
/// each pass. `test_reset` never overlaps with `run`.
#[async_trait]
pub trait Workload: Send + Sync {
    /// Workload identifier, for logs
    fn name(&self) -> &str;

    /// Create the seed data; skips work when matching data already exists
    async fn generate_data(&self, config: &RunConfig) -> Result<(), WorkloadError>;

    /// Prime caches before the first variant
    async fn warm_cache(&self, _config: &RunConfig) -> Result<(), WorkloadError> {
        Ok(())
    }

    /// Bring shared state (indexes, collections) to the variant's starting point
    async fn test_reset(&self, config: &RunConfig) -> Result<(), WorkloadError>;

    /// The per-worker unit of work
    ///
    /// Must be safe to run concurrently with other workers' `run` against the
    /// same store.
    async fn run(&self, ctx: &mut WorkerContext) -> Result<WorkerReport, WorkloadError>;
}

/// Workload errors
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    /// Store call failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Parameter combination the workload cannot run
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Run stopped early
    #[error("aborted: {0}")]
    Aborted(String),
}

/// Where a workload reads and writes
#[derive(Clone)]
pub struct WorkloadTarget {
    /// Shared data-plane client
    pub store: Arc<dyn RecordStore>,
    /// Test collection
    pub namespace: Namespace,
}

impl std::fmt::Debug for WorkloadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadTarget")
            .field("store", &self.store.name())
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Resolves a workload type name to an implementation
pub trait WorkloadFactory: Send + Sync {
    /// Construct the workload registered under `workload_type`
    fn create(
        &self,
        workload_type: &str,
        target: WorkloadTarget,
    ) -> Result<Arc<dyn Workload>, ConfigError>;
}

// ============================================================================
// Result Sink Trait
// ============================================================================

/// Destination for finished result records
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Sink identifier, for logs
    fn name(&self) -> &str;

    /// Persist one record; the sink takes ownership
    async fn record(&self, record: ResultRecord) -> Result<(), SinkError>;
}

/// Result sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Underlying store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Record could not be serialized
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
