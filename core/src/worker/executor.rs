//! Single worker execution

use std::sync::Arc;
use std::time::Instant;

use crate::traits::{Workload, WorkloadError};

use super::context::WorkerContext;
use super::stats::WorkerReport;

/// Run one worker to completion
///
/// The context is moved in; the worker owns it for the whole pass. Timing
/// falls back to the span of the `run` call when the workload does not
/// start/stop its own report.
pub async fn run_worker(
    workload: Arc<dyn Workload>,
    mut ctx: WorkerContext,
) -> Result<WorkerReport, WorkloadError> {
    let started = Instant::now();
    tracing::debug!(
        worker_id = ctx.index,
        workload = workload.name(),
        phase = %ctx.phase,
        "Worker started"
    );

    let mut report = workload.run(&mut ctx).await?;

    if report.started_at.is_none() {
        report.started_at = Some(started);
    }
    if report.ended_at.is_none() {
        report.stop();
    }

    tracing::debug!(
        worker_id = ctx.index,
        operations = report.operations,
        errors = report.errors,
        modified = report.modified,
        "Worker finished"
    );

    Ok(report)
}
