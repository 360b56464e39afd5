//! Bulk insert workload
//!
//! Measures batched inserts of synthesized records into a collection that
//! optionally starts pre-populated and carries secondary indexes.

use std::time::Instant;

use async_trait::async_trait;

use unibench_core::{
    DocumentSynthesizer, IdKind, Namespace, Phase, RunConfig, Workload, WorkerContext,
    WorkerReport, WorkloadError, WorkloadTarget,
};

use crate::seed::{seed_collection, GENERATOR_SEED};

/// Records each worker pool inserts when `totalDocsToInsert` is unset
pub const DEFAULT_TOTAL_DOCS: u64 = 1000;

/// Suffix of the collection holding seed data between variants
pub const INITIAL_SUFFIX: &str = "_initial";

/// Inserts synthesized records in batches
#[derive(Debug)]
pub struct InsertWorkload {
    target: WorkloadTarget,
}

impl InsertWorkload {
    /// Create the workload
    pub fn new(target: WorkloadTarget) -> Self {
        Self { target }
    }

    /// Collection that seed data is generated into
    pub fn seed_namespace(&self, config: &RunConfig) -> Namespace {
        if config.settings.generate_per_variant.unwrap_or(false) {
            self.target.namespace.clone()
        } else {
            let ns = &self.target.namespace;
            ns.sibling(format!("{}{INITIAL_SUFFIX}", ns.collection))
        }
    }

    async fn seed(&self, config: &RunConfig, ns: &Namespace) -> Result<u64, WorkloadError> {
        let mut synth = DocumentSynthesizer::new(
            GENERATOR_SEED,
            config.id_strategy(IdKind::None),
            config.doc_size_bytes(),
            Some(config.max_fields_per_object()),
        );
        let outcome = seed_collection(
            self.target.store.as_ref(),
            ns,
            config.initial_docs(0),
            config.write_batch_size(),
            |_| synth.create(None),
        )
        .await?;
        Ok(outcome.written())
    }
}

// Warm-up workers draw from a disjoint seed range so that their generated
// ids never collide with the measured pass.
fn synthesizer_seed(ctx: &WorkerContext) -> u64 {
    match ctx.phase {
        Phase::Measured => ctx.seed(),
        Phase::Warmup => ctx.seed() + ctx.count as u64,
    }
}

#[async_trait]
impl Workload for InsertWorkload {
    fn name(&self) -> &str {
        "insert"
    }

    async fn generate_data(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        if config.initial_docs(0) == 0 {
            return Ok(());
        }
        let ns = self.seed_namespace(config);
        self.seed(config, &ns).await?;
        Ok(())
    }

    async fn test_reset(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        let store = &self.target.store;
        let ns = &self.target.namespace;

        tracing::info!(namespace = %ns, "Dropping test collection");
        store.drop_collection(ns).await?;

        for i in 1..=config.settings.n_secondary_indexes.unwrap_or(0) {
            let field = format!("intfield{i}");
            tracing::info!(namespace = %ns, field = %field, "Creating secondary index");
            store.create_index(ns, &[field.as_str()]).await?;
        }

        if config.initial_docs(0) == 0 {
            return Ok(());
        }

        if config.settings.generate_per_variant.unwrap_or(false) {
            self.seed(config, ns).await?;
        } else {
            let from = self.seed_namespace(config);
            let copied = store.aggregate_out(&from, ns).await?;
            tracing::info!(from = %from, to = %ns, copied, "Copied seed data into test collection");
        }
        Ok(())
    }

    async fn run(&self, ctx: &mut WorkerContext) -> Result<WorkerReport, WorkloadError> {
        let config = ctx.config.clone();
        let per_worker = ctx.share(
            config
                .settings
                .total_docs_to_insert
                .unwrap_or(DEFAULT_TOTAL_DOCS),
        );
        let batch_size = config.write_batch_size().max(1);
        let mut synth = DocumentSynthesizer::new(
            synthesizer_seed(ctx),
            config.id_strategy(IdKind::None),
            config.doc_size_bytes(),
            Some(config.max_fields_per_object()),
        );

        let mut report = WorkerReport::new();
        report.start();

        let mut batch = Vec::with_capacity(batch_size);
        let mut batch_bytes = 0usize;
        for n in 0..per_worker {
            let record = synth.create(None);
            batch_bytes += record.encoded_len();
            batch.push(record);

            if batch.len() < batch_size && n + 1 < per_worker {
                continue;
            }

            let started = Instant::now();
            match self
                .target
                .store
                .insert_many(&self.target.namespace, std::mem::take(&mut batch))
                .await
            {
                Ok(inserted) => {
                    report.record_success(started.elapsed());
                    report.add_modified(inserted as u64);
                    report.add_bytes(batch_bytes);
                }
                Err(e) => {
                    report.record_error();
                    tracing::error!(worker_id = ctx.index, error = %e, "Error inserting batch");
                }
            }
            batch_bytes = 0;

            if ctx.index == 0 {
                tracing::debug!(
                    inserted = (n + 1) * ctx.count as u64,
                    total = per_worker * ctx.count as u64,
                    "Insert progress"
                );
            }
        }

        report.stop();
        Ok(report)
    }
}
