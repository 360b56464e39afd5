//! Worker module for executing one share of a pass
//!
//! A worker is one tokio task running `Workload::run` exactly once. It owns
//! its [`WorkerContext`] (index, seeded RNG, shared configuration) and hands
//! back a [`WorkerReport`] when it finishes. Workers never talk to each other;
//! contended writes are left to the store.
//!
//! # Example
//!
//! ```ignore
//! use unibench_core::worker::{run_worker, Phase, WorkerContext};
//!
//! let ctx = WorkerContext::new(0, 20, config, Phase::Measured);
//! let report = run_worker(workload, ctx).await?;
//! println!("operations: {}", report.operations);
//! ```

mod context;
mod executor;
mod stats;

pub use context::{Phase, WorkerContext};
pub use executor::run_worker;
pub use stats::WorkerReport;
