//! Cluster lifecycle reconciliation
//!
//! [`ClusterLifecycleManager`] drives a cluster to a desired state through a
//! [`ControlPlane`] and blocks until the state is observed or the poll budget
//! runs out. Waits always precede probes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use unibench_core::cluster::{
    ClusterError, ClusterReconciler, ClusterSpec, ClusterState, MetricsBundle, PollPolicy,
    ReconcileAction, ReconcileOutcome,
};

use crate::client::{cluster_payload, ControlPlane};

/// Process type reported for the replica set primary
const PRIMARY_TYPE: &str = "REPLICA_PRIMARY";

/// Cluster state reported once provisioning settles
const IDLE_STATE: &str = "IDLE";

/// Reconciles clusters through a control plane
pub struct ClusterLifecycleManager<C> {
    control: C,
    poll: PollPolicy,
}

impl<C: ControlPlane> ClusterLifecycleManager<C> {
    /// Create a manager
    pub fn new(control: C, poll: PollPolicy) -> Self {
        Self { control, poll }
    }

    /// Underlying control plane
    pub fn control(&self) -> &C {
        &self.control
    }

    /// Polling cadence
    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Poll until `desired` is observed; returns the number of probes issued
    ///
    /// Transient probe failures are logged and count as attempts.
    pub async fn await_state(
        &self,
        name: &str,
        desired: ClusterState,
    ) -> Result<u32, ClusterError> {
        for attempt in 1..=self.poll.max_attempts {
            tokio::time::sleep(self.poll.wait_before(attempt)).await;

            match self.probe(name).await {
                Ok(state) if state == desired => {
                    tracing::info!(cluster = name, state = %state, probes = attempt, "Cluster reached desired state");
                    return Ok(attempt);
                }
                Ok(state) => {
                    tracing::info!(
                        cluster = name,
                        current = %state,
                        desired = %desired,
                        attempt,
                        "Waiting for cluster"
                    );
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(cluster = name, attempt, error = %e, "Cluster probe failed");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClusterError::Timeout {
            name: name.to_string(),
            desired,
            attempts: self.poll.max_attempts,
        })
    }

    /// Process id of the cluster's primary
    pub async fn primary_process_id(&self, name: &str) -> Result<String, ClusterError> {
        let processes = self.control.list_processes().await?;
        find_primary(&processes, name).ok_or_else(|| ClusterError::PrimaryNotFound(name.to_string()))
    }
}

/// First `REPLICA_PRIMARY` whose alias starts with the lowercased cluster name
fn find_primary(processes: &Value, name: &str) -> Option<String> {
    let prefix = name.to_lowercase();
    processes
        .get("results")?
        .as_array()?
        .iter()
        .find(|p| {
            p.get("typeName").and_then(Value::as_str) == Some(PRIMARY_TYPE)
                && p.get("userAlias")
                    .and_then(Value::as_str)
                    .is_some_and(|alias| alias.starts_with(&prefix))
        })
        .and_then(|p| p.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn state_of(description: &Value) -> ClusterState {
    match description.get("stateName").and_then(Value::as_str) {
        Some(IDLE_STATE) => ClusterState::Ready,
        _ => ClusterState::Provisioning,
    }
}

#[async_trait]
impl<C: ControlPlane> ClusterReconciler for ClusterLifecycleManager<C> {
    async fn ensure_present(&self, spec: &ClusterSpec) -> Result<ReconcileOutcome, ClusterError> {
        let payload = cluster_payload(spec);
        let mut warnings = Vec::new();
        let mut probes = 0;

        let action = match self.probe(&spec.name).await? {
            ClusterState::Absent => {
                tracing::info!(
                    cluster = %spec.name,
                    tier = %spec.tier,
                    disk_gb = spec.disk_size_gb,
                    disk_type = %spec.disk_type,
                    iops = spec.iops,
                    "Creating cluster"
                );
                self.control.create_cluster(&payload).await?;

                // Best effort: the cluster is usable with the default oplog.
                if let Some(oplog_mb) = spec.oplog_size_mb {
                    let args = json!({ "oplogSizeMB": oplog_mb });
                    if let Err(e) = self.control.patch_process_args(&spec.name, &args).await {
                        tracing::error!(cluster = %spec.name, error = %e, "Failed to set oplog size");
                        warnings.push(format!("oplog size patch failed: {e}"));
                    }
                }
                ReconcileAction::Created
            }
            state => {
                if state == ClusterState::Provisioning {
                    probes += self.await_state(&spec.name, ClusterState::Ready).await?;
                }
                tracing::info!(
                    cluster = %spec.name,
                    tier = %spec.tier,
                    disk_gb = spec.disk_size_gb,
                    iops = spec.iops,
                    "Re-applying cluster configuration"
                );
                self.control.modify_cluster(&spec.name, &payload).await?;
                ReconcileAction::Modified
            }
        };

        probes += self.await_state(&spec.name, ClusterState::Ready).await?;

        Ok(ReconcileOutcome {
            state: ClusterState::Ready,
            action,
            warnings,
            probes,
        })
    }

    async fn ensure_absent(&self, name: &str) -> Result<ReconcileOutcome, ClusterError> {
        let already_absent = ReconcileOutcome {
            state: ClusterState::Absent,
            action: ReconcileAction::AlreadyAbsent,
            warnings: Vec::new(),
            probes: 0,
        };

        if self.probe(name).await? == ClusterState::Absent {
            tracing::info!(cluster = name, "Cluster already absent");
            return Ok(already_absent);
        }

        if !self.control.delete_cluster(name).await? {
            tracing::info!(cluster = name, "Cluster not found on delete");
            return Ok(already_absent);
        }
        tracing::info!(cluster = name, "Cluster deletion initiated");

        let probes = self.await_state(name, ClusterState::Absent).await?;
        Ok(ReconcileOutcome {
            state: ClusterState::Absent,
            action: ReconcileAction::Deleted,
            warnings: Vec::new(),
            probes,
        })
    }

    async fn probe(&self, name: &str) -> Result<ClusterState, ClusterError> {
        Ok(match self.control.get_cluster(name).await? {
            None => ClusterState::Absent,
            Some(description) => state_of(&description),
        })
    }

    async fn fetch_metrics_window(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricsBundle, ClusterError> {
        let process_id = self.primary_process_id(name).await?;
        let measurements = self
            .control
            .process_measurements(&process_id, start, end)
            .await?;
        let disks = self
            .control
            .disk_measurements(&process_id, start, end)
            .await?;

        Ok(MetricsBundle {
            process_id,
            measurements,
            disk_metrics: disks.get("measurements").cloned().unwrap_or(Value::Null),
        })
    }
}

impl<C> std::fmt::Debug for ClusterLifecycleManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterLifecycleManager")
            .field("poll", &self.poll)
            .finish()
    }
}

#[cfg(test)]
mod tests;
