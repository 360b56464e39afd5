//! Benchmark workloads
//!
//! This crate provides the [`Workload`] implementations that a suite can name
//! in its `workloadType` field:
//!
//! - `insert`: batched inserts into an optionally pre-populated collection
//! - `query`: templated finds against grouped, indexed records
//! - `update`: random single-record field increments
//! - `update_api`: `updateOne` versus `findOneAndUpdate`, with upsert options
//! - `contention`: concurrent increments on a few hot records
//!
//! [`WorkloadRegistry`] maps those names to constructors.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod contention;
pub mod insert;
pub mod query;
pub mod seed;
pub mod template;
pub mod update;
pub mod update_api;

use std::sync::Arc;

use unibench_core::{ConfigError, Workload, WorkloadFactory, WorkloadTarget};

pub use contention::ContentionWorkload;
pub use insert::InsertWorkload;
pub use query::QueryWorkload;
pub use template::QueryTemplate;
pub use update::UpdateWorkload;
pub use update_api::UpdateApiWorkload;

type Constructor = fn(WorkloadTarget) -> Arc<dyn Workload>;

fn build_insert(target: WorkloadTarget) -> Arc<dyn Workload> {
    Arc::new(InsertWorkload::new(target))
}

fn build_query(target: WorkloadTarget) -> Arc<dyn Workload> {
    Arc::new(QueryWorkload::new(target))
}

fn build_update(target: WorkloadTarget) -> Arc<dyn Workload> {
    Arc::new(UpdateWorkload::new(target))
}

fn build_update_api(target: WorkloadTarget) -> Arc<dyn Workload> {
    Arc::new(UpdateApiWorkload::new(target))
}

fn build_contention(target: WorkloadTarget) -> Arc<dyn Workload> {
    Arc::new(ContentionWorkload::new(target))
}

static WORKLOADS: [(&str, Constructor); 5] = [
    ("insert", build_insert),
    ("query", build_query),
    ("update", build_update),
    ("update_api", build_update_api),
    ("contention", build_contention),
];

/// Built-in workload types
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadRegistry;

impl WorkloadRegistry {
    /// Create the registry
    pub fn new() -> Self {
        Self
    }

    /// Registered type names
    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        WORKLOADS.iter().map(|(name, _)| *name)
    }
}

impl WorkloadFactory for WorkloadRegistry {
    fn create(
        &self,
        workload_type: &str,
        target: WorkloadTarget,
    ) -> Result<Arc<dyn Workload>, ConfigError> {
        WORKLOADS
            .iter()
            .find(|(name, _)| *name == workload_type)
            .map(|(_, construct)| construct(target))
            .ok_or_else(|| ConfigError::UnknownWorkload(workload_type.to_string()))
    }
}
