//! One warm-up or measured pass over the worker pool

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::RunConfig;
use crate::traits::Workload;
use crate::worker::{run_worker, Phase, WorkerContext, WorkerReport};

use super::aggregator::{aggregate_worker_reports, AggregatedStats};

/// Everything a pass produced
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// Pass kind
    pub phase: Phase,
    /// Workers submitted
    pub workers: usize,
    /// Reports from workers that finished cleanly
    pub reports: Vec<WorkerReport>,
    /// Workers that returned an error or panicked
    pub failures: usize,
    /// Merged reports
    pub stats: AggregatedStats,
    /// Submission time
    pub started_at: DateTime<Utc>,
    /// Time the last worker finished
    pub ended_at: DateTime<Utc>,
    /// Submission to last completion
    pub elapsed: Duration,
}

/// Run `config.thread_count()` workers, each calling `run` once
///
/// Waits for every worker with no timeout. A failing or panicking worker is
/// logged and counted; the others are unaffected.
pub async fn run_pass(
    workload: Arc<dyn Workload>,
    config: Arc<RunConfig>,
    phase: Phase,
) -> PassOutcome {
    let threads = config.thread_count();

    tracing::info!(
        test = %config.test_name,
        variant = %config.variant_name,
        phase = %phase,
        threads,
        "Starting pass"
    );

    let started_at = Utc::now();
    let start = Instant::now();

    let mut handles = Vec::with_capacity(threads);
    for worker_id in 0..threads {
        let ctx = WorkerContext::new(worker_id, threads, Arc::clone(&config), phase);
        let workload = Arc::clone(&workload);
        handles.push(tokio::spawn(run_worker(workload, ctx)));
    }

    // Wait for all workers to complete
    let mut reports = Vec::with_capacity(handles.len());
    let mut failures = 0;
    for (idx, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                failures += 1;
                tracing::error!(worker_id = idx, error = %e, "Worker returned error");
            }
            Err(e) => {
                failures += 1;
                tracing::error!(worker_id = idx, error = %e, "Worker task panicked");
            }
        }
    }

    let elapsed = start.elapsed();
    let ended_at = Utc::now();
    let stats = aggregate_worker_reports(&reports);

    tracing::info!(
        phase = %phase,
        elapsed_secs = elapsed.as_secs_f64(),
        operations = stats.total_operations,
        errors = stats.total_errors,
        failures,
        ops = stats.operations_per_second,
        "Pass completed"
    );

    PassOutcome {
        phase,
        workers: threads,
        reports,
        failures,
        stats,
        started_at,
        ended_at,
        elapsed,
    }
}
