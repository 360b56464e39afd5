//! Indexed query workload
//!
//! Seed records carry a `group` and a position within the group so that
//! templates can target either the single-field or the compound index.

use std::time::Instant;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

use unibench_core::{
    DocumentSynthesizer, FieldValue, Filter, FindOptions, IdKind, Phase, Record, RunConfig,
    Workload, WorkerContext, WorkerReport, WorkloadError, WorkloadTarget,
};

use crate::seed::{numeric_id, seed_collection, GENERATOR_SEED};
use crate::template::QueryTemplate;

/// Seed records when `initialDocsToInsert` is unset
pub const DEFAULT_INITIAL_DOCS: u64 = 100_000;

/// Records per group when `groupSize` is unset
pub const DEFAULT_GROUP_SIZE: u64 = 400;

/// Queries per pass when `nQueries` is unset
pub const DEFAULT_QUERIES: u64 = 100_000;

/// Runs templated finds and checks each result size
#[derive(Debug)]
pub struct QueryWorkload {
    target: WorkloadTarget,
}

impl QueryWorkload {
    /// Create the workload
    pub fn new(target: WorkloadTarget) -> Self {
        Self { target }
    }
}

/// Fields with a truthy projection value
fn projection_fields(projection: &Value) -> Option<Vec<String>> {
    let map = projection.as_object()?;
    Some(
        map.iter()
            .filter(|(_, v)| match v {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                _ => false,
            })
            .map(|(k, _)| k.clone())
            .collect(),
    )
}

/// Compiled `query` setting; an unset query matches everything
fn template_for(config: &RunConfig) -> Result<QueryTemplate, WorkloadError> {
    match &config.settings.query {
        Some(query) => QueryTemplate::compile(query),
        None => QueryTemplate::compile(&Value::Object(Default::default())),
    }
}

fn group_fields(n: u64, groups: u64) -> Record {
    let seq = n / groups;
    Record::new()
        .with("_id", numeric_id(n))
        .with("group", numeric_id(n % groups))
        .with("group_seq", FieldValue::Double(seq as f64))
        .with("group_seq_i", numeric_id(seq))
}

#[async_trait]
impl Workload for QueryWorkload {
    fn name(&self) -> &str {
        "query"
    }

    async fn generate_data(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        let initial = config.initial_docs(DEFAULT_INITIAL_DOCS);
        let group_size = config
            .settings
            .group_size
            .unwrap_or(DEFAULT_GROUP_SIZE)
            .max(1);
        let groups = (initial / group_size).max(1);

        let mut synth = DocumentSynthesizer::new(
            GENERATOR_SEED,
            config.id_strategy(IdKind::ObjectId),
            config.doc_size_bytes(),
            Some(config.max_fields_per_object()),
        );
        seed_collection(
            self.target.store.as_ref(),
            &self.target.namespace,
            initial,
            config.write_batch_size(),
            |n| synth.create(Some(&group_fields(n, groups))),
        )
        .await?;

        let ns = &self.target.namespace;
        self.target.store.create_index(ns, &["group"]).await?;
        self.target
            .store
            .create_index(ns, &["group", "group_seq_i"])
            .await?;
        Ok(())
    }

    async fn test_reset(&self, config: &RunConfig) -> Result<(), WorkloadError> {
        // Fail fast on a bad template rather than in every worker.
        let template = template_for(config)?;
        let sample = template.render(&mut StdRng::seed_from_u64(GENERATOR_SEED));
        Filter::from_json(&sample).map_err(|e| {
            WorkloadError::InvalidParameter(format!("query {sample} cannot run: {e}"))
        })?;
        Ok(())
    }

    async fn run(&self, ctx: &mut WorkerContext) -> Result<WorkerReport, WorkloadError> {
        let config = ctx.config.clone();
        let settings = &config.settings;
        let template = template_for(&config)?;
        let per_worker = ctx.share(settings.n_queries.unwrap_or(DEFAULT_QUERIES));
        let limit = settings.limit.unwrap_or(1) as usize;
        let options = FindOptions {
            limit: (limit > 0).then_some(limit),
            skip: settings.skip.unwrap_or(0) as usize,
            projection: settings.projection.as_ref().and_then(projection_fields),
        };

        if ctx.index == 0 && ctx.phase == Phase::Measured {
            tracing::info!(example = %template.render(&mut ctx.rng.clone()), "Example query");
        }

        let mut report = WorkerReport::new();
        report.start();

        for _ in 0..per_worker {
            let query = template.render(&mut ctx.rng);
            let filter = Filter::from_json(&query)?;

            let started = Instant::now();
            match self
                .target
                .store
                .find(&self.target.namespace, &filter, &options)
                .await
            {
                Ok(found) if limit > 0 && found.len() != limit => {
                    report.record_error();
                    report.add_read(found.len());
                    tracing::error!(
                        worker_id = ctx.index,
                        count = found.len(),
                        limit,
                        query = %query,
                        "Result count does not match limit"
                    );
                }
                Ok(found) => {
                    report.record_success(started.elapsed());
                    report.add_read(found.len());
                }
                Err(e) => {
                    report.record_error();
                    tracing::error!(worker_id = ctx.index, error = %e, "Query failed");
                }
            }
        }

        report.stop();
        Ok(report)
    }
}
