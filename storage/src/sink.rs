//! Result sinks
//!
//! Both sinks keep a full history plus a "latest" view keyed by test and
//! variant, so re-running a variant replaces its previous result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use unibench_core::{
    FieldValue, Filter, Namespace, Record, RecordStore, ResultRecord, ResultSink, SinkError,
};

/// Database holding result collections
pub const RESULTS_DATABASE: &str = "unibench";

/// Latest result per test and variant
pub const RESULTS_COLLECTION: &str = "results";

/// Every result ever recorded
pub const HISTORY_COLLECTION: &str = "results_history";

/// Operator counters that cannot be stored as field names on shared tiers
const UNSAFE_COUNTERS: [(&str, &str); 3] = [
    ("match", "$where"),
    ("expressions", "$function"),
    ("groupAccumulators", "$accumulator"),
];

/// Remove `$where`, `$function` and `$accumulator` from a server status
///
/// Missing sections are left alone.
pub fn sanitize_server_status(status: &mut Value) {
    let Some(counters) = status
        .get_mut("metrics")
        .and_then(|m| m.get_mut("operatorCounters"))
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    for (section, operator) in UNSAFE_COUNTERS {
        if let Some(section) = counters.get_mut(section).and_then(Value::as_object_mut) {
            section.remove(operator);
        }
    }
}

fn sanitize(record: &mut ResultRecord) {
    sanitize_server_status(&mut record.before_status);
    sanitize_server_status(&mut record.after_status);
}

// ============================================================================
// Store sink
// ============================================================================

/// Writes results into a [`RecordStore`]
pub struct StoreResultSink {
    store: Arc<dyn RecordStore>,
    results: Namespace,
    history: Namespace,
}

impl StoreResultSink {
    /// Sink writing to the default results database
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_database(store, RESULTS_DATABASE)
    }

    /// Sink writing to `database`
    pub fn with_database(store: Arc<dyn RecordStore>, database: &str) -> Self {
        Self {
            store,
            results: Namespace::new(database, RESULTS_COLLECTION),
            history: Namespace::new(database, HISTORY_COLLECTION),
        }
    }

    /// Namespace of the latest-result collection
    pub fn results_namespace(&self) -> &Namespace {
        &self.results
    }

    /// Namespace of the history collection
    pub fn history_namespace(&self) -> &Namespace {
        &self.history
    }
}

#[async_trait]
impl ResultSink for StoreResultSink {
    fn name(&self) -> &str {
        "store"
    }

    async fn record(&self, mut record: ResultRecord) -> Result<(), SinkError> {
        sanitize(&mut record);

        let document = serde_json::to_value(&record)?;
        let body = Record::from_json(&document).unwrap_or_default();
        let id = FieldValue::from_json(&record.identity());

        self.store.insert_one(&self.history, body.clone()).await?;

        let latest: Record = std::iter::once(("_id".to_string(), id.clone()))
            .chain(body.iter().map(|(k, v)| (k.to_string(), v.clone())))
            .collect();
        self.store
            .replace_one(&self.results, &Filter::Eq("_id".to_string(), id), latest, true)
            .await?;

        tracing::debug!(
            test = %record.test_name,
            variant = %record.variant_name,
            "Result recorded in {}",
            self.results
        );
        Ok(())
    }
}

impl std::fmt::Debug for StoreResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreResultSink")
            .field("store", &self.store.name())
            .field("results", &self.results)
            .finish()
    }
}

// ============================================================================
// Directory sink
// ============================================================================

/// Writes results as JSON files under a directory
///
/// `results_history.jsonl` gets one line per result and
/// `latest/<test>-<variant>.json` holds the most recent one.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    /// Sink rooted at `dir`; directories are created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// History file path
    pub fn history_path(&self) -> PathBuf {
        self.dir.join(format!("{HISTORY_COLLECTION}.jsonl"))
    }

    /// Latest-result file for a record
    pub fn latest_path(&self, record: &ResultRecord) -> PathBuf {
        self.dir.join("latest").join(format!("{}.json", record.slug()))
    }
}

#[async_trait]
impl ResultSink for JsonDirSink {
    fn name(&self) -> &str {
        "json-dir"
    }

    async fn record(&self, mut record: ResultRecord) -> Result<(), SinkError> {
        sanitize(&mut record);

        let latest = self.latest_path(&record);
        if let Some(parent) = latest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut history = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())
            .await?;
        history.write_all(&line).await?;
        history.flush().await?;

        tokio::fs::write(&latest, serde_json::to_vec_pretty(&record)?).await?;

        tracing::info!(path = %latest.display(), "Result written");
        Ok(())
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Writes each result to every inner sink
///
/// All sinks are attempted; the first failure is returned afterwards.
pub struct FanOutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanOutSink {
    /// Sink over `sinks`, written in order
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }

    /// Number of inner sinks
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no inner sinks
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl ResultSink for FanOutSink {
    fn name(&self) -> &str {
        "fan-out"
    }

    async fn record(&self, record: ResultRecord) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(record.clone()).await {
                tracing::error!(sink = sink.name(), error = %e, "Result sink failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for FanOutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("FanOutSink").field("sinks", &names).finish()
    }
}
