//! Write contention workload
//!
//! Every worker hammers the same few records. With `indexUpdate` set, the
//! incremented field is also part of an index so each write touches it.

use std::time::Instant;

use async_trait::async_trait;
use rand::Rng;

use unibench_core::{
    Filter, Phase, RunConfig, Update, Workload, WorkerContext, WorkerReport, WorkloadError,
    WorkloadTarget,
};

use crate::seed::numeric_id;
use crate::update::{seed_counters, DEFAULT_INITIAL_DOCS, DEFAULT_UPDATES};

const INDEX_KEYS: [&str; 2] = ["_id", "count"];

/// Increments `count` on a fixed set of hot records
#[derive(Debug)]
pub struct ContentionWorkload {
    target: WorkloadTarget,
}

impl ContentionWorkload {
    /// Create the workload
    pub fn new(target: WorkloadTarget) -> Self {
        Self { target }
    }
}

/// Ids of `n` hot records spread evenly over `0..initial`
pub fn hot_spots(initial: u64, n: u64) -> Vec<u64> {
    let n = n.max(1);
    (0..n).map(|i| initial * i / n).collect()
}

#[async_trait]
impl Workload for ContentionWorkload {
    fn name(&self) -> &str {
        "contention"
    }

    async fn generate_data(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        seed_counters(&self.target, config, config.initial_docs(DEFAULT_INITIAL_DOCS)).await
    }

    async fn test_reset(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        let ns = &self.target.namespace;
        if config.settings.index_update.unwrap_or(false) {
            tracing::info!(namespace = %ns, "Creating index on _id, count");
            self.target.store.create_index(ns, &INDEX_KEYS).await?;
        } else if let Err(e) = self.target.store.drop_index(ns, &INDEX_KEYS).await {
            tracing::debug!(namespace = %ns, error = %e, "Could not drop index on _id, count");
        }
        Ok(())
    }

    async fn run(&self, ctx: &mut WorkerContext) -> Result<WorkerReport, WorkloadError> {
        let config = ctx.config.clone();
        let settings = &config.settings;
        let spots = hot_spots(
            config.initial_docs(DEFAULT_INITIAL_DOCS),
            settings.n_hot_spots.unwrap_or(1),
        );
        let per_worker = ctx.share(settings.n_updates.unwrap_or(DEFAULT_UPDATES));
        let update = Update::new().inc("count", 1);

        if ctx.index == 0 && ctx.phase == Phase::Measured {
            tracing::info!(per_worker, threads = ctx.count, hot_spots = spots.len(), "Starting contention workload");
        }

        let mut report = WorkerReport::new();
        report.start();

        for _ in 0..per_worker {
            let id = spots[ctx.rng.gen_range(0..spots.len())];
            let filter = Filter::eq("_id", numeric_id(id));

            let started = Instant::now();
            match self
                .target
                .store
                .update_one(&self.target.namespace, &filter, &update, false)
                .await
            {
                Ok(outcome) => {
                    report.record_success(started.elapsed());
                    report.add_modified(outcome.modified);
                }
                Err(e) => {
                    report.record_error();
                    tracing::error!(worker_id = ctx.index, error = %e, "Update failed");
                }
            }
        }

        report.stop();
        Ok(report)
    }
}
