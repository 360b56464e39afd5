//! unibench-core: Core data structures for benchmarking document databases
//!
//! This crate provides the foundational types used across all unibench
//! components, including:
//!
//! - Records and the seeded record synthesizer
//! - Core traits (Workload, RecordStore, ClusterReconciler, ResultSink)
//! - Layered suite/workload/variant configuration
//! - The worker pool and suite orchestrator
//! - Result records and error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod record;
pub mod store;
pub mod synth;
pub mod traits;
pub mod worker;

pub use cluster::{
    ClusterError, ClusterOverride, ClusterReconciler, ClusterSpec, ClusterState, MetricsBundle,
    PollPolicy, ReconcileAction, ReconcileOutcome,
};
pub use config::{
    ConfigError, LoadedSuite, RunConfig, Settings, SuiteConfig, UpdateFunction, Variant,
    WorkloadConfig,
};
pub use error::*;
pub use metrics::*;
pub use orchestrator::{
    run_pass, AggregatedStats, PassOutcome, SuiteRunner, SuiteRunnerBuilder, SuiteSummary,
};
pub use record::{FieldValue, Record};
pub use store::{
    Filter, FindOptions, Namespace, RecordStore, StoreError, Update, UpdateOp, UpdateOutcome,
};
pub use synth::{DocumentSynthesizer, IdKind, IdStrategy};
pub use traits::*;
pub use worker::{run_worker, Phase, WorkerContext, WorkerReport};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    // =========================================================================
    // Configuration layering end to end
    // =========================================================================

    #[test]
    fn test_variant_overrides_workload_overrides_suite() {
        let suite = SuiteConfig::from_json_str(
            &json!({ "threadCount": 8, "writeBatchSize": 500, "docSizeKB": 1 }).to_string(),
            Path::new("."),
        )
        .unwrap();
        let workload = WorkloadConfig::from_json_str(
            "inserts",
            &json!({
                "workloadType": "insert",
                "database": "bench",
                "collection": "docs",
                "threadCount": 4,
                "variants": [{ "threadCount": 2 }, {}]
            })
            .to_string(),
        )
        .unwrap();

        let first = RunConfig::resolve(&suite, &workload, &workload.variants[0], 0).unwrap();
        let second = RunConfig::resolve(&suite, &workload, &workload.variants[1], 1).unwrap();

        assert_eq!(first.thread_count(), 2);
        assert_eq!(second.thread_count(), 4);
        assert_eq!(first.write_batch_size(), 500);
        assert_eq!(first.doc_size_bytes(), 1024);
        assert_eq!(second.variant_name, "variant-1");
        assert_eq!(first.namespace(), Namespace::new("bench", "docs"));
    }

    #[test]
    fn test_synthesized_records_fill_run_config_size() {
        let config = RunConfig::new(
            "sized",
            "insert",
            &Namespace::new("bench", "docs"),
            Settings {
                doc_size_kb: Some(4.0),
                ..Settings::default()
            },
        );
        let ctx = WorkerContext::new(3, 4, std::sync::Arc::new(config), Phase::Measured);
        let mut synth = ctx.synthesizer(IdKind::Uuid);

        let record = synth.create(None);
        assert!(record.encoded_len() >= 4096);
        assert_eq!(record.encoded_len(), record.to_bytes().unwrap().len());
        assert!(matches!(record.get("_id"), Some(FieldValue::Uuid(_))));
    }
}
