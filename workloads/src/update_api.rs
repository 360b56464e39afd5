//! Update API comparison workload
//!
//! Compares `updateOne` against `findOneAndUpdate`, with and without upsert,
//! over a mix of existing and brand-new ids. Without upsert a miss falls back
//! to a plain insert of the full record.

use std::time::Instant;

use async_trait::async_trait;
use rand::Rng;

use unibench_core::{
    DocumentSynthesizer, Filter, IdKind, Phase, Record, RunConfig, Update, UpdateFunction,
    Workload, WorkerContext, WorkerReport, WorkloadError, WorkloadTarget,
};

use crate::seed::numeric_id;
use crate::update::{seed_counters, trim_to_seed, DEFAULT_INITIAL_DOCS, DEFAULT_UPDATES};

/// Upserts or updates-then-inserts records by id
#[derive(Debug)]
pub struct UpdateApiWorkload {
    target: WorkloadTarget,
}

/// How one iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Updated,
    Upserted,
    Inserted,
}

impl UpdateApiWorkload {
    /// Create the workload
    pub fn new(target: WorkloadTarget) -> Self {
        Self { target }
    }

    async fn apply(
        &self,
        function: UpdateFunction,
        upsert: bool,
        filter: &Filter,
        update: &Update,
        full: Record,
    ) -> Result<Applied, WorkloadError> {
        let store = &self.target.store;
        let ns = &self.target.namespace;

        let missed = match function {
            UpdateFunction::UpdateOne => {
                let outcome = store.update_one(ns, filter, update, upsert).await?;
                if outcome.upserted {
                    return Ok(Applied::Upserted);
                }
                outcome.matched == 0
            }
            UpdateFunction::FindOneAndUpdate => store
                .find_one_and_update(ns, filter, update, upsert)
                .await?
                .is_none(),
        };

        if missed && !upsert {
            store.insert_one(ns, full).await?;
            return Ok(Applied::Inserted);
        }
        Ok(Applied::Updated)
    }
}

#[async_trait]
impl Workload for UpdateApiWorkload {
    fn name(&self) -> &str {
        "update_api"
    }

    async fn generate_data(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        seed_counters(&self.target, config, config.initial_docs(DEFAULT_INITIAL_DOCS)).await
    }

    async fn test_reset(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        let initial = config.initial_docs(DEFAULT_INITIAL_DOCS);
        let per_worker = config.settings.n_updates.unwrap_or(DEFAULT_UPDATES)
            / config.thread_count().max(1) as u64;
        if per_worker > initial {
            return Err(WorkloadError::InvalidParameter(format!(
                "{per_worker} updates per worker exceeds {initial} seed records"
            )));
        }
        trim_to_seed(&self.target, initial).await
    }

    async fn run(&self, ctx: &mut WorkerContext) -> Result<WorkerReport, WorkloadError> {
        let config = ctx.config.clone();
        let settings = &config.settings;
        let initial = config.initial_docs(DEFAULT_INITIAL_DOCS);
        let per_worker = ctx.share(settings.n_updates.unwrap_or(DEFAULT_UPDATES));
        let percent_new = settings.percent_new.unwrap_or(0).min(100);
        let upsert = settings.upsert.unwrap_or(false);
        let function = settings.update_function.unwrap_or(UpdateFunction::UpdateOne);

        if ctx.index == 0 && ctx.phase == Phase::Measured {
            tracing::info!(
                per_worker,
                threads = ctx.count,
                percent_new,
                function = ?function,
                upsert,
                "Starting update API workload"
            );
        }

        let mut synth = DocumentSynthesizer::new(
            ctx.seed(),
            config.id_strategy(IdKind::ObjectId),
            config.doc_size_bytes(),
            Some(config.max_fields_per_object()),
        );
        let first_new = initial + ctx.index as u64 * initial;

        let mut report = WorkerReport::new();
        report.start();

        for i in 0..per_worker {
            let is_new = percent_new > 0 && ctx.rng.gen_range(0..100) < percent_new;
            let id = if is_new {
                numeric_id(first_new + i)
            } else {
                numeric_id(ctx.rng.gen_range(0..initial.max(1)))
            };

            let full = synth.create(Some(&Record::new().with("_id", id.clone())));
            let update = Update::new().inc("count", 1).set_on_insert(full.clone());
            let filter = Filter::eq("_id", id);

            let started = Instant::now();
            match self.apply(function, upsert, &filter, &update, full).await {
                Ok(applied) => {
                    report.record_success(started.elapsed());
                    report.add_modified(1);
                    if applied == Applied::Inserted {
                        tracing::debug!(worker_id = ctx.index, "Fell back to insert");
                    }
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
