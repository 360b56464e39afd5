//! Suite, workload and variant configuration
//!
//! Configuration is layered: built-in defaults, then suite-level defaults,
//! then the workload file, then the variant. [`Settings::overlay`] merges two
//! layers field by field and [`RunConfig`] is the resolved snapshot shared by
//! every worker of a pass.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cluster::{ClusterOverride, ClusterSpec, PollPolicy};
use crate::store::Namespace;
use crate::synth::{IdKind, IdStrategy};

/// Worker count when no layer sets one
pub const DEFAULT_THREAD_COUNT: usize = 20;

/// Insert batch size when no layer sets one
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 1000;

/// Record size when no layer sets one
pub const DEFAULT_DOC_SIZE_BYTES: usize = 2048;

/// Per-object field bound when no layer sets one
pub const DEFAULT_MAX_FIELDS_PER_OBJECT: usize = 200;

// ============================================================================
// Settings
// ============================================================================

/// How the update-api workload issues its updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateFunction {
    /// Plain update
    #[serde(rename = "updateOne", alias = "UpdateOne", alias = "updateone")]
    UpdateOne,
    /// Update returning the post-image
    #[serde(
        rename = "findOneAndUpdate",
        alias = "FindOneAndUpdate",
        alias = "findoneandupdate"
    )]
    FindOneAndUpdate,
}

/// One configuration layer; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    /// Concurrent workers per pass
    #[serde(alias = "numberOfThreads", skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<usize>,

    /// Run an unmeasured pass before the measured one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup: Option<bool>,

    /// Records per insert batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_batch_size: Option<usize>,

    /// `_id` strategy for synthesized records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_type: Option<IdKind>,

    /// Bucket count for business ids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id_buckets: Option<u32>,

    /// Target record size in KiB
    #[serde(rename = "docSizeKB", alias = "docSizeKb", skip_serializing_if = "Option::is_none")]
    pub doc_size_kb: Option<f64>,

    /// Bound on fields per object before nesting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fields_per_object: Option<usize>,

    /// Records generated before any variant runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_docs_to_insert: Option<u64>,

    /// Records inserted by a pass, across all workers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_docs_to_insert: Option<u64>,

    /// Regenerate the seed data for every variant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_per_variant: Option<bool>,

    /// Secondary indexes created on reset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_secondary_indexes: Option<u32>,

    /// Updates per pass, across all workers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_updates: Option<u64>,

    /// Fields touched per update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_fields: Option<u32>,

    /// Ids updated are drawn from `0..docRange`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_range: Option<u64>,

    /// Use expression-style updates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressive: Option<bool>,

    /// Run for this long instead of a fixed count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_time_secs: Option<u64>,

    /// Percentage of updates that target new ids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_new: Option<u32>,

    /// Upsert instead of falling back to insert
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,

    /// Update call used by the update-api workload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_function: Option<UpdateFunction>,

    /// Queries per pass, across all workers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_queries: Option<u64>,

    /// Query limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Query skip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,

    /// Query projection document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Value>,

    /// Query template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,

    /// Records per query group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_size: Option<u64>,

    /// Contended records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_hot_spots: Option<u64>,

    /// Index the contended field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_update: Option<bool>,
}

macro_rules! overlay_fields {
    ($base:ident, $top:ident, $($field:ident),+ $(,)?) => {
        Settings {
            $($field: $top.$field.clone().or_else(|| $base.$field.clone()),)+
        }
    };
}

impl Settings {
    /// Merge `higher` over `self`; fields set in `higher` win
    pub fn overlay(&self, higher: &Settings) -> Settings {
        let base = self;
        let top = higher;
        overlay_fields!(
            base,
            top,
            thread_count,
            warmup,
            write_batch_size,
            id_type,
            business_id_buckets,
            doc_size_kb,
            max_fields_per_object,
            initial_docs_to_insert,
            total_docs_to_insert,
            generate_per_variant,
            n_secondary_indexes,
            n_updates,
            n_fields,
            doc_range,
            expressive,
            test_time_secs,
            percent_new,
            upsert,
            update_function,
            n_queries,
            limit,
            skip,
            projection,
            query,
            group_size,
            n_hot_spots,
            index_update,
        )
    }

    /// Parse the settings keys left over after a document's own fields
    fn from_extra(extra: Map<String, Value>, origin: &str) -> Result<Settings, ConfigError> {
        serde_json::from_value(Value::Object(extra))
            .map_err(|e| ConfigError::Invalid(format!("{origin}: {e}")))
    }

    /// Range checks that do not depend on the workload type
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_count == Some(0) {
            return Err(ConfigError::Invalid(
                "threadCount must be at least 1".into(),
            ));
        }
        if self.write_batch_size == Some(0) {
            return Err(ConfigError::Invalid(
                "writeBatchSize must be at least 1".into(),
            ));
        }
        if let Some(kb) = self.doc_size_kb {
            if kb.is_nan() || kb <= 0.0 {
                return Err(ConfigError::Invalid("docSizeKB must be positive".into()));
            }
        }
        if let Some(pct) = self.percent_new {
            if pct > 100 {
                return Err(ConfigError::Invalid(
                    "percentNew must be between 0 and 100".into(),
                ));
            }
        }
        if self.group_size == Some(0) {
            return Err(ConfigError::Invalid("groupSize must be at least 1".into()));
        }
        if self.n_hot_spots == Some(0) {
            return Err(ConfigError::Invalid("nHotSpots must be at least 1".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Documents
// ============================================================================

/// A variant: a sparse override applied to one measured pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variant {
    /// Optional label
    pub name: Option<String>,
    /// Cluster change applied before the pass
    pub instance: Option<ClusterOverride>,
    /// Setting overrides
    pub settings: Settings,
    /// The variant document as written, used as its identity
    pub raw: Map<String, Value>,
}

impl Variant {
    fn from_json(value: Value, origin: &str) -> Result<Variant, ConfigError> {
        let Value::Object(raw) = value else {
            return Err(ConfigError::Invalid(format!(
                "{origin}: variant must be an object"
            )));
        };
        let mut extra = raw.clone();
        let name = match extra.remove("name") {
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "{origin}: variant name must be a string, got {other}"
                )))
            }
            None => None,
        };
        let instance = extra
            .remove("instance")
            .map(serde_json::from_value::<ClusterOverride>)
            .transpose()
            .map_err(|e| ConfigError::Invalid(format!("{origin}: instance: {e}")))?;
        let settings = Settings::from_extra(extra, origin)?;
        Ok(Variant {
            name,
            instance,
            settings,
            raw,
        })
    }

    /// Label used in logs and result keys
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("variant-{index}"))
    }
}

/// One workload file
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadConfig {
    /// Name the result records are filed under (the file stem)
    pub test_name: String,
    /// Registry key of the workload implementation
    pub workload_type: String,
    /// Target database
    pub database: String,
    /// Target collection
    pub collection: String,
    /// Workload-level settings
    pub settings: Settings,
    /// Variants run in order
    pub variants: Vec<Variant>,
    /// The document as written
    pub raw: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWorkload {
    #[serde(alias = "testClassName")]
    workload_type: String,
    database: String,
    collection: String,
    #[serde(default)]
    variants: Vec<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl WorkloadConfig {
    /// Parse a workload document
    pub fn from_json_str(test_name: &str, text: &str) -> Result<WorkloadConfig, ConfigError> {
        let raw_value: Value = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from(test_name),
            source: e,
        })?;
        let raw: RawWorkload = serde_json::from_value(raw_value.clone())
            .map_err(|e| ConfigError::Invalid(format!("{test_name}: {e}")))?;

        let settings = Settings::from_extra(raw.extra, test_name)?;
        let variants = if raw.variants.is_empty() {
            // A workload with no variants runs once with its own settings.
            vec![Variant::default()]
        } else {
            raw.variants
                .into_iter()
                .map(|v| Variant::from_json(v, test_name))
                .collect::<Result<Vec<_>, _>>()?
        };

        let config = WorkloadConfig {
            test_name: test_name.to_string(),
            workload_type: raw.workload_type,
            database: raw.database,
            collection: raw.collection,
            settings,
            variants,
            raw: raw_value,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate identity fields and every settings layer
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.is_empty() || self.collection.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{}: database and collection must be non-empty",
                self.test_name
            )));
        }
        self.settings.validate()?;
        for variant in &self.variants {
            variant.settings.validate()?;
        }
        Ok(())
    }
}

/// Top-level suite document
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteConfig {
    /// Suite label
    pub name: Option<String>,
    /// Cluster to provision; `None` runs against the store as-is
    pub cluster: Option<ClusterSpec>,
    /// Polling cadence for cluster reconciliation
    pub poll: PollPolicy,
    /// Delete the cluster after the last workload
    pub teardown_cluster: bool,
    /// Workload files, resolved against the suite file's directory
    pub workloads: Vec<PathBuf>,
    /// Suite-level defaults
    pub defaults: Settings,
    /// The document as written
    pub raw: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSuite {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cluster: Option<ClusterSpec>,
    #[serde(default)]
    poll: Option<PollPolicy>,
    #[serde(default, alias = "teardownAtlas")]
    teardown_cluster: bool,
    #[serde(default, alias = "tests")]
    workloads: Vec<PathBuf>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl SuiteConfig {
    /// Parse a suite document; relative workload paths resolve against `base_dir`
    pub fn from_json_str(text: &str, base_dir: &Path) -> Result<SuiteConfig, ConfigError> {
        let raw_value: Value = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            path: base_dir.to_path_buf(),
            source: e,
        })?;
        let raw: RawSuite = serde_json::from_value(raw_value.clone())
            .map_err(|e| ConfigError::Invalid(format!("suite: {e}")))?;
        let defaults = Settings::from_extra(raw.extra, "suite")?;
        defaults.validate()?;

        let workloads = raw
            .workloads
            .into_iter()
            .map(|p| if p.is_absolute() { p } else { base_dir.join(p) })
            .collect();

        Ok(SuiteConfig {
            name: raw.name,
            cluster: raw.cluster,
            poll: raw.poll.unwrap_or_default(),
            teardown_cluster: raw.teardown_cluster,
            workloads,
            defaults,
            raw: raw_value,
        })
    }

    /// Read a suite file and every workload file it lists
    pub fn load(path: &Path) -> Result<LoadedSuite, ConfigError> {
        let text = read_file(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let suite = Self::from_json_str(&text, base_dir)?;

        let mut workloads = Vec::with_capacity(suite.workloads.len());
        for file in &suite.workloads {
            let text = read_file(file)?;
            workloads.push(WorkloadConfig::from_json_str(&test_name_for(file), &text)?);
        }

        tracing::debug!(
            suite = ?suite.name,
            workloads = workloads.len(),
            "Loaded suite configuration"
        );

        Ok(LoadedSuite { suite, workloads })
    }
}

/// A suite with its workload files parsed
#[derive(Debug, Clone)]
pub struct LoadedSuite {
    /// The suite document
    pub suite: SuiteConfig,
    /// Workloads in run order
    pub workloads: Vec<WorkloadConfig>,
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Test name for a workload file: its stem
pub fn test_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Configuration snapshot for one variant, shared read-only by its workers
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Result identity: workload file stem
    pub test_name: String,
    /// Workload registry key
    pub workload_type: String,
    /// Target database
    pub database: String,
    /// Target collection
    pub collection: String,
    /// Variant label
    pub variant_name: String,
    /// Variant document as written
    pub variant: Map<String, Value>,
    /// Resolved settings: suite, then workload, then variant
    pub settings: Settings,
}

impl RunConfig {
    /// Configuration with a single settings layer
    pub fn new(
        test_name: impl Into<String>,
        workload_type: impl Into<String>,
        namespace: &Namespace,
        settings: Settings,
    ) -> RunConfig {
        RunConfig {
            test_name: test_name.into(),
            workload_type: workload_type.into(),
            database: namespace.database.clone(),
            collection: namespace.collection.clone(),
            variant_name: "base".to_string(),
            variant: Map::new(),
            settings,
        }
    }

    /// Test collection
    pub fn namespace(&self) -> Namespace {
        Namespace::new(&self.database, &self.collection)
    }

    /// Resolve the layers for one variant
    pub fn resolve(
        suite: &SuiteConfig,
        workload: &WorkloadConfig,
        variant: &Variant,
        variant_index: usize,
    ) -> Result<RunConfig, ConfigError> {
        let settings = suite
            .defaults
            .overlay(&workload.settings)
            .overlay(&variant.settings);
        settings.validate()?;

        Ok(RunConfig {
            test_name: workload.test_name.clone(),
            workload_type: workload.workload_type.clone(),
            database: workload.database.clone(),
            collection: workload.collection.clone(),
            variant_name: variant.label(variant_index),
            variant: variant.raw.clone(),
            settings,
        })
    }

    /// Workload-level configuration, used for data generation
    pub fn base(suite: &SuiteConfig, workload: &WorkloadConfig) -> Result<RunConfig, ConfigError> {
        let mut config = Self::resolve(suite, workload, &Variant::default(), 0)?;
        config.variant_name = "base".to_string();
        Ok(config)
    }

    /// Worker count
    pub fn thread_count(&self) -> usize {
        self.settings.thread_count.unwrap_or(DEFAULT_THREAD_COUNT)
    }

    /// Whether to run an unmeasured pass first
    pub fn warmup(&self) -> bool {
        self.settings.warmup.unwrap_or(true)
    }

    /// Records per insert batch
    pub fn write_batch_size(&self) -> usize {
        self.settings
            .write_batch_size
            .unwrap_or(DEFAULT_WRITE_BATCH_SIZE)
    }

    /// Target record size in bytes
    pub fn doc_size_bytes(&self) -> usize {
        self.settings
            .doc_size_kb
            .map(|kb| (kb * 1024.0) as usize)
            .unwrap_or(DEFAULT_DOC_SIZE_BYTES)
    }

    /// Per-object field bound
    pub fn max_fields_per_object(&self) -> usize {
        self.settings
            .max_fields_per_object
            .unwrap_or(DEFAULT_MAX_FIELDS_PER_OBJECT)
    }

    /// Id strategy, defaulting to `default` when no layer sets `idType`
    pub fn id_strategy(&self, default: IdKind) -> IdStrategy {
        IdStrategy::from_kind(
            self.settings.id_type.unwrap_or(default),
            self.settings.business_id_buckets,
        )
    }

    /// Seed-data size, defaulting to `default`
    pub fn initial_docs(&self, default: u64) -> u64 {
        self.settings.initial_docs_to_insert.unwrap_or(default)
    }

    /// Settings as JSON, for result snapshots
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "testname": self.test_name,
            "workloadType": self.workload_type,
            "database": self.database,
            "collection": self.collection,
            "variant": self.variant_name,
            "settings": serde_json::to_value(&self.settings).unwrap_or(Value::Null),
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid JSON
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },

    /// Document is well-formed but not acceptable
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// No workload registered under this name
    #[error("unknown workload type: {0}")]
    UnknownWorkload(String),
}
