//! Random single-record update workload

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;

use unibench_core::{
    DocumentSynthesizer, Filter, IdKind, Record, RunConfig, Update, Workload, WorkerContext,
    WorkerReport, WorkloadError, WorkloadTarget,
};

use crate::seed::{numeric_id, seed_collection, GENERATOR_SEED};

/// Seed records when `initialDocsToInsert` is unset
pub const DEFAULT_INITIAL_DOCS: u64 = 100_000;

/// Updates per pass when `nUpdates` is unset
pub const DEFAULT_UPDATES: u64 = 100_000;

/// Seed `count`-carrying records `0..initial` into the target collection
pub(crate) async fn seed_counters(
    target: &WorkloadTarget,
    config: &RunConfig,
    initial: u64,
) -> Result<(), WorkloadError> {
    let mut synth = DocumentSynthesizer::new(
        GENERATOR_SEED,
        config.id_strategy(IdKind::ObjectId),
        config.doc_size_bytes(),
        Some(config.max_fields_per_object()),
    );
    seed_collection(
        target.store.as_ref(),
        &target.namespace,
        initial,
        config.write_batch_size(),
        |n| {
            let head = Record::new().with("_id", numeric_id(n)).with("count", 0i32);
            synth.create(Some(&head))
        },
    )
    .await?;
    Ok(())
}

/// Remove records that earlier passes inserted past the seed range
pub(crate) async fn trim_to_seed(target: &WorkloadTarget, initial: u64) -> Result<(), WorkloadError> {
    let removed = target
        .store
        .delete_many(&target.namespace, &Filter::gte("_id", numeric_id(initial)))
        .await?;
    if removed > 0 {
        tracing::info!(namespace = %target.namespace, removed, "Removed records past the seed range");
    }
    Ok(())
}

/// Increments integer fields on randomly chosen records
#[derive(Debug)]
pub struct UpdateWorkload {
    target: WorkloadTarget,
}

impl UpdateWorkload {
    /// Create the workload
    pub fn new(target: WorkloadTarget) -> Self {
        Self { target }
    }
}

fn field_update(n_fields: u32, expressive: bool) -> Update {
    (1..=n_fields).fold(Update::new(), |update, i| {
        let field = format!("intfield{i}");
        if expressive {
            update.add(field, 1)
        } else {
            update.inc(field, 1)
        }
    })
}

#[async_trait]
impl Workload for UpdateWorkload {
    fn name(&self) -> &str {
        "update"
    }

    async fn generate_data(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        seed_counters(&self.target, config, config.initial_docs(DEFAULT_INITIAL_DOCS)).await
    }

    async fn test_reset(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        let initial = config.initial_docs(DEFAULT_INITIAL_DOCS);
        let per_worker = config.settings.n_updates.unwrap_or(DEFAULT_UPDATES)
            / config.thread_count().max(1) as u64;
        if per_worker > initial {
            tracing::warn!(per_worker, initial, "Each worker would update more records than exist");
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
        let doc_range = settings.doc_range.unwrap_or(initial).max(1);
        let per_worker = ctx.share(settings.n_updates.unwrap_or(DEFAULT_UPDATES));
        let time_limit = settings
            .test_time_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);
        let update = field_update(
            settings.n_fields.unwrap_or(1),
            settings.expressive.unwrap_or(false),
        );

        let mut report = WorkerReport::new();
        report.start();
        let began = Instant::now();
        let mut done = 0u64;

        loop {
            match time_limit {
                Some(limit) if began.elapsed() >= limit => break,
                None if done >= per_worker => break,
                _ => {}
            }
            done += 1;

            let id = ctx.rng.gen_range(0..doc_range);
            let filter = Filter::eq("_id", numeric_id(id));

            let started = Instant::now();
            match self
                .target
                .store
                .update_one(&self.target.namespace, &filter, &update, false)
                .await
            {
                Ok(outcome) if outcome.modified == 1 => {
                    report.record_success(started.elapsed());
                    report.add_modified(1);
                }
                Ok(outcome) => {
                    report.record_error();
                    tracing::error!(
                        worker_id = ctx.index,
                        id,
                        matched = outcome.matched,
                        modified = outcome.modified,
                        "Update did not modify exactly one record"
                    );
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
