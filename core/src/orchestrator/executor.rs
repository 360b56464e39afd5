//! Suite execution: the per-workload, per-variant state machine

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::cluster::{ClusterReconciler, ClusterSpec, ReconcileOutcome};
use crate::config::{LoadedSuite, RunConfig, SuiteConfig, Variant, WorkloadConfig};
use crate::error::BenchResult;
use crate::metrics::ResultRecord;
use crate::store::{Namespace, RecordStore};
use crate::traits::{ResultSink, Workload, WorkloadFactory, WorkloadTarget};
use crate::worker::Phase;

use super::pass::run_pass;

/// Metrics window verified before the first workload
const INIT_METRICS_WINDOW_MINUTES: i64 = 10;

/// Counters for a finished suite run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuiteSummary {
    /// Workloads whose data generation succeeded
    pub workloads_run: usize,
    /// Workloads skipped because data generation failed
    pub workloads_skipped: usize,
    /// Variants that produced a result record
    pub variants_completed: usize,
    /// Variants whose setup or pass failed, including skipped ones
    pub variants_failed: usize,
    /// Records accepted by the sink
    pub records_emitted: usize,
    /// Workers that failed across all passes
    pub worker_failures: usize,
}

/// The managed cluster for a run, when there is one
#[derive(Clone, Copy)]
struct ManagedCluster<'a> {
    reconciler: &'a dyn ClusterReconciler,
    spec: &'a ClusterSpec,
}

/// Runs a loaded suite against a store
///
/// Use `SuiteRunnerBuilder` to construct one.
pub struct SuiteRunner {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) factory: Arc<dyn WorkloadFactory>,
    pub(crate) reconciler: Option<Arc<dyn ClusterReconciler>>,
    pub(crate) sink: Option<Arc<dyn ResultSink>>,
}

impl SuiteRunner {
    /// Run every workload and variant in order
    ///
    /// Variant failures are counted and the run continues; `Timeout` and
    /// `Config` errors abort it. When the suite asks for teardown the cluster
    /// is removed even after an abort.
    pub async fn run(&self, loaded: &LoadedSuite) -> BenchResult<SuiteSummary> {
        let suite = &loaded.suite;
        let cluster = self.managed_cluster(suite);

        tracing::info!(
            suite = ?suite.name,
            workloads = loaded.workloads.len(),
            cluster = cluster.map(|c| c.spec.name.as_str()),
            "Starting suite"
        );

        let mut summary = SuiteSummary::default();
        let result = match cluster {
            Some(c) => match self.init_cluster(c).await {
                Ok(()) => self.run_workloads(loaded, cluster, &mut summary).await,
                Err(e) => Err(e),
            },
            None => self.run_workloads(loaded, cluster, &mut summary).await,
        };

        let teardown = match cluster {
            Some(c) if suite.teardown_cluster => self.teardown(c).await,
            _ => Ok(()),
        };

        match (result, teardown) {
            (Ok(()), Ok(())) => {
                tracing::info!(
                    workloads_run = summary.workloads_run,
                    variants_completed = summary.variants_completed,
                    variants_failed = summary.variants_failed,
                    records_emitted = summary.records_emitted,
                    worker_failures = summary.worker_failures,
                    "Suite completed"
                );
                Ok(summary)
            }
            (Ok(()), Err(e)) => Err(e),
            (Err(e), teardown) => {
                if let Err(te) = teardown {
                    tracing::error!(error = %te, "Cluster teardown failed");
                }
                Err(e)
            }
        }
    }

    fn managed_cluster<'a>(&'a self, suite: &'a SuiteConfig) -> Option<ManagedCluster<'a>> {
        match (&suite.cluster, &self.reconciler) {
            (Some(spec), Some(reconciler)) => Some(ManagedCluster {
                reconciler: reconciler.as_ref(),
                spec,
            }),
            (Some(spec), None) => {
                tracing::warn!(
                    cluster = %spec.name,
                    "Suite declares a cluster but no reconciler is configured; running without cluster management"
                );
                None
            }
            _ => None,
        }
    }

    async fn init_cluster(&self, cluster: ManagedCluster<'_>) -> BenchResult<()> {
        let outcome = cluster.reconciler.ensure_present(cluster.spec).await?;
        log_outcome(&cluster.spec.name, &outcome);

        // Fail early if measurements cannot be read.
        let end = Utc::now();
        let start = end - chrono::Duration::minutes(INIT_METRICS_WINDOW_MINUTES);
        cluster
            .reconciler
            .fetch_metrics_window(&cluster.spec.name, start, end)
            .await?;
        Ok(())
    }

    async fn teardown(&self, cluster: ManagedCluster<'_>) -> BenchResult<()> {
        let outcome = cluster.reconciler.ensure_absent(&cluster.spec.name).await?;
        log_outcome(&cluster.spec.name, &outcome);
        Ok(())
    }

    async fn run_workloads(
        &self,
        loaded: &LoadedSuite,
        cluster: Option<ManagedCluster<'_>>,
        summary: &mut SuiteSummary,
    ) -> BenchResult<()> {
        let suite = &loaded.suite;

        for workload_config in &loaded.workloads {
            let target = WorkloadTarget {
                store: Arc::clone(&self.store),
                namespace: Namespace::new(&workload_config.database, &workload_config.collection),
            };
            let workload = self
                .factory
                .create(&workload_config.workload_type, target)?;
            let base = RunConfig::base(suite, workload_config)?;

            tracing::info!(
                test = %workload_config.test_name,
                workload = workload.name(),
                variants = workload_config.variants.len(),
                "Preparing workload"
            );

            if let Err(e) = workload.generate_data(&base).await {
                tracing::error!(
                    test = %workload_config.test_name,
                    error = %e,
                    "Data generation failed; skipping workload"
                );
                summary.workloads_skipped += 1;
                summary.variants_failed += workload_config.variants.len();
                continue;
            }
            if let Err(e) = workload.warm_cache(&base).await {
                tracing::warn!(test = %workload_config.test_name, error = %e, "Cache warm-up failed");
            }
            summary.workloads_run += 1;

            for (idx, variant) in workload_config.variants.iter().enumerate() {
                let result = self
                    .run_variant(suite, workload_config, &workload, variant, idx, cluster, summary)
                    .await;
                match result {
                    Ok(()) => summary.variants_completed += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        summary.variants_failed += 1;
                        tracing::error!(
                            test = %workload_config.test_name,
                            variant = %variant.label(idx),
                            error = %e,
                            "Variant failed"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_variant(
        &self,
        suite: &SuiteConfig,
        workload_config: &WorkloadConfig,
        workload: &Arc<dyn Workload>,
        variant: &Variant,
        idx: usize,
        cluster: Option<ManagedCluster<'_>>,
        summary: &mut SuiteSummary,
    ) -> BenchResult<()> {
        let config = Arc::new(RunConfig::resolve(suite, workload_config, variant, idx)?);

        if let (Some(instance), Some(c)) = (&variant.instance, cluster) {
            let spec = c.spec.with_override(instance);
            let outcome = c.reconciler.ensure_present(&spec).await?;
            log_outcome(&spec.name, &outcome);
        }

        workload.test_reset(&config).await?;

        if config.warmup() {
            let warm = run_pass(Arc::clone(workload), Arc::clone(&config), Phase::Warmup).await;
            summary.worker_failures += warm.failures;
        }

        let before_status = self.store.server_status().await?;
        let pass = run_pass(Arc::clone(workload), Arc::clone(&config), Phase::Measured).await;
        let after_status = self.store.server_status().await?;
        summary.worker_failures += pass.failures;

        if pass.failures == pass.workers {
            tracing::warn!(
                test = %config.test_name,
                variant = %config.variant_name,
                "Every worker failed; recording an empty pass"
            );
        }

        let metrics = match cluster {
            Some(c) => match c
                .reconciler
                .fetch_metrics_window(&c.spec.name, pass.started_at, pass.ended_at)
                .await
            {
                Ok(bundle) => Some(bundle),
                Err(e) => {
                    tracing::warn!(error = %e, "Cluster metrics unavailable for this pass");
                    None
                }
            },
            None => None,
        };

        let record = ResultRecord {
            test_name: config.test_name.clone(),
            suite_name: suite.name.clone(),
            variant_name: config.variant_name.clone(),
            variant: config.variant.clone(),
            start_time: pass.started_at,
            end_time: pass.ended_at,
            duration_ms: pass.elapsed.as_millis() as u64,
            thread_count: pass.workers,
            worker_failures: pass.failures,
            before_status,
            after_status,
            metrics,
            stats: pass.stats,
            test_config: config.snapshot(),
            bench_config: suite.raw.clone(),
        };
        self.emit(record, summary).await;
        Ok(())
    }

    async fn emit(&self, record: ResultRecord, summary: &mut SuiteSummary) {
        let Some(sink) = &self.sink else {
            tracing::debug!(test = %record.test_name, "No result sink configured");
            return;
        };
        let test = record.test_name.clone();
        let variant = record.variant_name.clone();
        match sink.record(record).await {
            Ok(()) => {
                summary.records_emitted += 1;
                tracing::info!(test = %test, variant = %variant, sink = sink.name(), "Result recorded");
            }
            Err(e) => {
                tracing::error!(test = %test, variant = %variant, error = %e, "Failed to record result");
            }
        }
    }
}

fn log_outcome(name: &str, outcome: &ReconcileOutcome) {
    tracing::info!(
        cluster = name,
        state = %outcome.state,
        action = ?outcome.action,
        probes = outcome.probes,
        "Cluster reconciled"
    );
    for warning in &outcome.warnings {
        tracing::warn!(cluster = name, warning = %warning, "Reconciliation warning");
    }
}

impl std::fmt::Debug for SuiteRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteRunner")
            .field("store", &self.store.name())
            .field("reconciler", &self.reconciler.is_some())
            .field("sink", &self.sink.as_ref().map(|s| s.name()))
            .finish()
    }
}

