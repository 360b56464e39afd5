//! Tests for cluster lifecycle reconciliation
//!
//! The mock control plane derives cluster state from the (paused) tokio
//! clock, so poll timing is exact.

use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

// ============================================================================
// Mock ControlPlane
// ============================================================================

struct MockControl {
    created_at: Mutex<Option<Instant>>,
    deleted_at: Mutex<Option<Instant>>,
    ready_after: Duration,
    gone_after: Duration,
    fail_patch: bool,
    delete_not_found: bool,
    transient_failures: AtomicUsize,
    fatal_probe: bool,
    processes: Value,
    calls: Mutex<Vec<String>>,
}

impl MockControl {
    fn absent() -> Self {
        Self {
            created_at: Mutex::new(None),
            deleted_at: Mutex::new(None),
            ready_after: Duration::from_secs(15),
            gone_after: Duration::from_secs(20),
            fail_patch: false,
            delete_not_found: false,
            transient_failures: AtomicUsize::new(0),
            fatal_probe: false,
            processes: json!({ "results": [] }),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Cluster created at the current instant
    fn created_now() -> Self {
        let control = Self::absent();
        *control.created_at.lock().unwrap() = Some(Instant::now());
        control
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl ControlPlane for MockControl {
    async fn get_cluster(&self, _name: &str) -> Result<Option<Value>, ClusterError> {
        self.log("get");
        if self.fatal_probe {
            return Err(ClusterError::Api {
                status: 401,
                body: "unauthorized".into(),
            });
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClusterError::Api {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let now = Instant::now();
        if let Some(deleted) = *self.deleted_at.lock().unwrap() {
            if now - deleted >= self.gone_after {
                return Ok(None);
            }
            return Ok(Some(json!({ "stateName": "DELETING" })));
        }
        match *self.created_at.lock().unwrap() {
            None => Ok(None),
            Some(created) if now - created >= self.ready_after => {
                Ok(Some(json!({ "name": "bench", "stateName": "IDLE" })))
            }
            Some(_) => Ok(Some(json!({ "name": "bench", "stateName": "CREATING" }))),
        }
    }

    async fn create_cluster(&self, payload: &Value) -> Result<(), ClusterError> {
        self.log(&format!("create:{}", payload["name"].as_str().unwrap_or("")));
        *self.created_at.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    async fn modify_cluster(&self, name: &str, _payload: &Value) -> Result<(), ClusterError> {
        self.log(&format!("modify:{name}"));
        Ok(())
    }

    async fn patch_process_args(&self, _name: &str, args: &Value) -> Result<(), ClusterError> {
        self.log(&format!("patch:{}", args["oplogSizeMB"]));
        if self.fail_patch {
            return Err(ClusterError::Api {
                status: 400,
                body: "bad oplog".into(),
            });
        }
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<bool, ClusterError> {
        self.log(&format!("delete:{name}"));
        if self.delete_not_found {
            return Ok(false);
        }
        *self.deleted_at.lock().unwrap() = Some(Instant::now());
        Ok(true)
    }

    async fn list_processes(&self) -> Result<Value, ClusterError> {
        Ok(self.processes.clone())
    }

    async fn process_measurements(
        &self,
        process_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Value, ClusterError> {
        Ok(json!({ "processId": process_id, "measurements": [{ "name": "OPCOUNTER_UPDATE" }] }))
    }

    async fn disk_measurements(
        &self,
        _process_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Value, ClusterError> {
        Ok(json!({ "partitionName": "data", "measurements": [{ "name": "DISK_PARTITION_IOPS_READ" }] }))
    }
}

fn manager(control: MockControl) -> ClusterLifecycleManager<MockControl> {
    ClusterLifecycleManager::new(control, PollPolicy::default())
}

fn spec() -> ClusterSpec {
    ClusterSpec::new("bench", "M30")
}

// ============================================================================
// await_state
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_await_state_waits_before_each_probe() {
    let start = Instant::now();
    let mgr = manager(MockControl::created_now());

    let probes = mgr.await_state("bench", ClusterState::Ready).await.unwrap();

    // Probes at 10s (still creating) and 40s (idle since 15s).
    assert_eq!(probes, 2);
    assert_eq!(start.elapsed(), Duration::from_secs(40));
}

#[tokio::test(start_paused = true)]
async fn test_await_state_times_out() {
    let mut control = MockControl::created_now();
    control.ready_after = Duration::from_secs(3600);
    let mgr = ClusterLifecycleManager::new(
        control,
        PollPolicy {
            first_wait: Duration::from_secs(1),
            steady_wait: Duration::from_secs(2),
            max_attempts: 3,
        },
    );

    let err = mgr.await_state("bench", ClusterState::Ready).await.unwrap_err();

    match err {
        ClusterError::Timeout {
            attempts, desired, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(desired, ClusterState::Ready);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(mgr.control().calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_await_state_tolerates_transient_probe_failure() {
    let mut control = MockControl::created_now();
    control.ready_after = Duration::ZERO;
    control.transient_failures = AtomicUsize::new(1);
    let mgr = manager(control);

    let probes = mgr.await_state("bench", ClusterState::Ready).await.unwrap();
    assert_eq!(probes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_await_state_propagates_auth_failure() {
    let mut control = MockControl::created_now();
    control.fatal_probe = true;
    let mgr = manager(control);

    let err = mgr.await_state("bench", ClusterState::Ready).await.unwrap_err();
    assert!(matches!(err, ClusterError::Api { status: 401, .. }));
}

// ============================================================================
// ensure_present
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ensure_present_creates_absent_cluster() {
    let mgr = manager(MockControl::absent());

    let outcome = mgr.ensure_present(&spec()).await.unwrap();

    assert_eq!(outcome.state, ClusterState::Ready);
    assert_eq!(outcome.action, ReconcileAction::Created);
    assert_eq!(outcome.probes, 2);
    assert!(outcome.warnings.is_empty());
    assert_eq!(
        mgr.control().calls(),
        vec!["get", "create:bench", "patch:12345", "get", "get"]
    );
    assert_eq!(mgr.probe("bench").await.unwrap(), ClusterState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_present_patch_failure_is_a_warning() {
    let mut control = MockControl::absent();
    control.fail_patch = true;
    let mgr = manager(control);

    let outcome = mgr.ensure_present(&spec()).await.unwrap();

    assert_eq!(outcome.state, ClusterState::Ready);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("oplog"));
}

#[tokio::test(start_paused = true)]
async fn test_ensure_present_skips_patch_without_oplog_size() {
    let mgr = manager(MockControl::absent());
    let mut spec = spec();
    spec.oplog_size_mb = None;

    mgr.ensure_present(&spec).await.unwrap();

    assert!(!mgr.control().calls().iter().any(|c| c.starts_with("patch")));
}

#[tokio::test(start_paused = true)]
async fn test_ensure_present_reapplies_to_ready_cluster() {
    let mut control = MockControl::created_now();
    control.ready_after = Duration::ZERO;
    let mgr = manager(control);

    let outcome = mgr.ensure_present(&spec()).await.unwrap();

    assert_eq!(outcome.action, ReconcileAction::Modified);
    assert_eq!(outcome.probes, 1);
    assert_eq!(mgr.control().calls(), vec!["get", "modify:bench", "get"]);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_present_waits_out_provisioning_before_modify() {
    let mgr = manager(MockControl::created_now());

    let outcome = mgr.ensure_present(&spec()).await.unwrap();

    assert_eq!(outcome.action, ReconcileAction::Modified);
    // Two probes to reach idle, one after the modify.
    assert_eq!(outcome.probes, 3);
    let calls = mgr.control().calls();
    let modify_at = calls.iter().position(|c| c == "modify:bench").unwrap();
    assert_eq!(modify_at, 3);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_present_never_returns_provisioning() {
    let mut control = MockControl::absent();
    control.ready_after = Duration::from_secs(86_400);
    let mgr = ClusterLifecycleManager::new(
        control,
        PollPolicy {
            first_wait: Duration::from_secs(10),
            steady_wait: Duration::from_secs(30),
            max_attempts: 5,
        },
    );

    let err = mgr.ensure_present(&spec()).await.unwrap_err();
    assert!(matches!(err, ClusterError::Timeout { .. }));
}

// ============================================================================
// ensure_absent
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ensure_absent_is_idempotent() {
    let mgr = manager(MockControl::absent());

    let first = mgr.ensure_absent("bench").await.unwrap();
    let second = mgr.ensure_absent("bench").await.unwrap();

    assert_eq!(first.action, ReconcileAction::AlreadyAbsent);
    assert_eq!(second.action, ReconcileAction::AlreadyAbsent);
    assert!(!mgr.control().calls().iter().any(|c| c.starts_with("delete")));
}

#[tokio::test(start_paused = true)]
async fn test_ensure_absent_deletes_and_waits() {
    let start = Instant::now();
    let mgr = manager(MockControl::created_now());

    let outcome = mgr.ensure_absent("bench").await.unwrap();

    assert_eq!(outcome.state, ClusterState::Absent);
    assert_eq!(outcome.action, ReconcileAction::Deleted);
    assert_eq!(outcome.probes, 2);
    assert_eq!(start.elapsed(), Duration::from_secs(40));
    assert_eq!(mgr.probe("bench").await.unwrap(), ClusterState::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_absent_treats_delete_404_as_success() {
    let mut control = MockControl::created_now();
    control.delete_not_found = true;
    let mgr = manager(control);

    let outcome = mgr.ensure_absent("bench").await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::AlreadyAbsent);
}

// ============================================================================
// Metrics
// ============================================================================

#[tokio::test]
async fn test_fetch_metrics_window_uses_primary() {
    let mut control = MockControl::absent();
    control.processes = json!({
        "results": [
            { "id": "bench-shard-00-00:27017", "typeName": "REPLICA_SECONDARY", "userAlias": "bench-shard-00-00.abc.mongodb.net" },
            { "id": "other-shard-00-01:27017", "typeName": "REPLICA_PRIMARY", "userAlias": "other-shard-00-01.abc.mongodb.net" },
            { "id": "bench-shard-00-01:27017", "typeName": "REPLICA_PRIMARY", "userAlias": "bench-shard-00-01.abc.mongodb.net" }
        ]
    });
    let mgr = manager(control);
    let end = Utc::now();
    let start = end - chrono::Duration::minutes(10);

    let bundle = mgr.fetch_metrics_window("Bench", start, end).await.unwrap();

    assert_eq!(bundle.process_id, "bench-shard-00-01:27017");
    assert_eq!(bundle.measurements["processId"], "bench-shard-00-01:27017");
    assert_eq!(bundle.disk_metrics[0]["name"], "DISK_PARTITION_IOPS_READ");
}

#[tokio::test]
async fn test_fetch_metrics_window_without_primary() {
    let mgr = manager(MockControl::absent());
    let end = Utc::now();

    let err = mgr.fetch_metrics_window("bench", end, end).await.unwrap_err();
    assert!(matches!(err, ClusterError::PrimaryNotFound(_)));
}

#[test]
fn test_state_of_description() {
    assert_eq!(state_of(&json!({ "stateName": "IDLE" })), ClusterState::Ready);
    assert_eq!(state_of(&json!({ "stateName": "UPDATING" })), ClusterState::Provisioning);
    assert_eq!(state_of(&json!({})), ClusterState::Provisioning);
}
