//! Orchestrator for suite lifecycle management
//!
//! The SuiteRunner drives one suite run:
//!
//! ```text
//! Init -> [per workload: GenerateData -> WarmCache ->
//!          [per variant: ReconcileCluster? -> Reset -> Warmup? -> Measured -> Emit]]
//!      -> Teardown?
//! ```
//!
//! Each pass spawns one tokio task per worker and awaits all of them before
//! the next step starts.
//!
//! # Example
//!
//! ```ignore
//! use unibench_core::{SuiteConfig, SuiteRunnerBuilder};
//!
//! let loaded = SuiteConfig::load(path)?;
//! let runner = SuiteRunnerBuilder::new()
//!     .store(store)
//!     .factory(registry)
//!     .build()?;
//!
//! let summary = runner.run(&loaded).await?;
//! ```

mod aggregator;
mod builder;
mod executor;
mod pass;

pub use aggregator::{aggregate_worker_reports, AggregatedStats};
pub use builder::SuiteRunnerBuilder;
pub use executor::{SuiteRunner, SuiteSummary};
pub use pass::{run_pass, PassOutcome};
