//! Data-plane contract
//!
//! Workloads talk to the database under test only through [`RecordStore`].
//! Filters and updates are typed so that every store implementation sees the
//! same small operation vocabulary.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::record::{compare_values, FieldValue, Record};

/// Database and collection pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Namespace {
    /// Database name
    pub database: String,
    /// Collection name
    pub collection: String,
}

impl Namespace {
    /// Create a namespace
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Sibling collection in the same database
    pub fn sibling(&self, collection: impl Into<String>) -> Self {
        Self::new(self.database.clone(), collection)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Range comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
}

impl CmpOp {
    fn accepts(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Gte => ord != Ordering::Less,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Lte => ord != Ordering::Greater,
        }
    }
}

/// Record predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches everything
    All,
    /// Field equals value
    Eq(String, FieldValue),
    /// Field equals one of the values
    In(String, Vec<FieldValue>),
    /// Field compares against value
    Cmp(String, CmpOp, FieldValue),
    /// All sub-filters match
    And(Vec<Filter>),
}

impl Filter {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Filter::Cmp(field.into(), CmpOp::Gte, value.into())
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Filter::Cmp(field.into(), CmpOp::Lt, value.into())
    }

    /// Evaluate against a record
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => record
                .get(field)
                .is_some_and(|v| compare_values(v, value) == Ordering::Equal),
            Filter::In(field, values) => record.get(field).is_some_and(|v| {
                values
                    .iter()
                    .any(|c| compare_values(v, c) == Ordering::Equal)
            }),
            Filter::Cmp(field, op, value) => record.get(field).is_some_and(|v| {
                // Range operators only compare within the same type class.
                let same_class = v.as_f64().is_some() == value.as_f64().is_some();
                same_class && op.accepts(compare_values(v, value))
            }),
            Filter::And(parts) => parts.iter().all(|p| p.matches(record)),
        }
    }

    /// The `_id` value when this filter pins exactly one id
    pub fn id_equality(&self) -> Option<&FieldValue> {
        match self {
            Filter::Eq(field, value) if field == "_id" => Some(value),
            Filter::And(parts) => parts.iter().find_map(Filter::id_equality),
            _ => None,
        }
    }

    /// Parse a query document such as `{"group": 3, "_id": {"$in": [1, 2]}}`
    pub fn from_json(query: &Value) -> Result<Filter, StoreError> {
        let map = query
            .as_object()
            .ok_or_else(|| StoreError::UnsupportedFilter(format!("not an object: {query}")))?;

        let mut clauses = Vec::new();
        for (key, value) in map {
            if key == "$and" {
                let items = value.as_array().ok_or_else(|| {
                    StoreError::UnsupportedFilter("$and expects an array".to_string())
                })?;
                for item in items {
                    clauses.push(Filter::from_json(item)?);
                }
                continue;
            }
            if key.starts_with('$') {
                return Err(StoreError::UnsupportedFilter(format!(
                    "unsupported operator {key}"
                )));
            }
            match value.as_object() {
                Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    for (op, operand) in ops {
                        clauses.push(Self::operator_clause(key, op, operand)?);
                    }
                }
                _ => clauses.push(Filter::Eq(key.clone(), FieldValue::from_json(value))),
            }
        }

        Ok(match clauses.len() {
            0 => Filter::All,
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        })
    }

    fn operator_clause(field: &str, op: &str, operand: &Value) -> Result<Filter, StoreError> {
        let field = field.to_string();
        let value = FieldValue::from_json(operand);
        Ok(match op {
            "$eq" => Filter::Eq(field, value),
            "$gt" => Filter::Cmp(field, CmpOp::Gt, value),
            "$gte" => Filter::Cmp(field, CmpOp::Gte, value),
            "$lt" => Filter::Cmp(field, CmpOp::Lt, value),
            "$lte" => Filter::Cmp(field, CmpOp::Lte, value),
            "$in" => match value {
                FieldValue::Array(items) => Filter::In(field, items),
                _ => {
                    return Err(StoreError::UnsupportedFilter(format!(
                        "$in on {field} expects an array"
                    )))
                }
            },
            other => {
                return Err(StoreError::UnsupportedFilter(format!(
                    "unsupported operator {other} on {field}"
                )))
            }
        })
    }
}

// ============================================================================
// Updates
// ============================================================================

/// One update operator
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// `$inc`: add to a numeric field, creating it when missing
    Inc(String, i64),
    /// `$set`
    Set(String, FieldValue),
    /// Pipeline `$set: {f: {$add: ["$f", n]}}`; missing fields stay null
    Add(String, i64),
    /// `$setOnInsert`: fields applied only when an upsert inserts
    SetOnInsert(Record),
}

/// Ordered list of update operators
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    /// Operators in application order
    pub ops: Vec<UpdateOp>,
}

impl Update {
    /// Empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `$inc`
    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.ops.push(UpdateOp::Inc(field.into(), by));
        self
    }

    /// Add a `$set`
    pub fn set(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    /// Add an expression-style addition
    pub fn add(mut self, field: impl Into<String>, by: i64) -> Self {
        self.ops.push(UpdateOp::Add(field.into(), by));
        self
    }

    /// Add a `$setOnInsert`
    pub fn set_on_insert(mut self, fields: Record) -> Self {
        self.ops.push(UpdateOp::SetOnInsert(fields));
        self
    }
}

/// Options for [`RecordStore::find`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Maximum records returned
    pub limit: Option<usize>,
    /// Records skipped before returning
    pub skip: usize,
    /// Fields to return (plus `_id`); `None` returns whole records
    pub projection: Option<Vec<String>>,
}

/// Result of an update or replace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    /// Records the filter matched
    pub matched: u64,
    /// Records changed
    pub modified: u64,
    /// Whether an upsert inserted a record
    pub upserted: bool,
}

/// Data-plane errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Insert collided with an existing `_id`
    #[error("duplicate key {key} in {namespace}")]
    DuplicateKey {
        /// Namespace written to
        namespace: String,
        /// Offending id, rendered
        key: String,
    },

    /// Filter could not be parsed or evaluated
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Update could not be applied
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// Backend failure
    #[error("backend error: {0}")]
    Backend(String),
}

// ============================================================================
// Store trait
// ============================================================================

/// Data-plane client shared by all workers
///
/// Every method is atomic per call; concurrent updates to one record are
/// serialized by the store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store identifier, for logs
    fn name(&self) -> &str;

    /// Insert records; returns the number inserted
    async fn insert_many(&self, ns: &Namespace, records: Vec<Record>) -> Result<usize, StoreError>;

    /// Insert one record
    async fn insert_one(&self, ns: &Namespace, record: Record) -> Result<(), StoreError>;

    /// Query records
    async fn find(
        &self,
        ns: &Namespace,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Record>, StoreError>;

    /// Update the first match, inserting when `upsert` and nothing matches
    async fn update_one(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Like `update_one`, returning the post-update record
    async fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Record>, StoreError>;

    /// Replace the first match
    async fn replace_one(
        &self,
        ns: &Namespace,
        filter: &Filter,
        replacement: Record,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Delete every match; returns the number deleted
    async fn delete_many(&self, ns: &Namespace, filter: &Filter) -> Result<u64, StoreError>;

    /// Create an ascending index on `keys`; returns its name
    async fn create_index(&self, ns: &Namespace, keys: &[&str]) -> Result<String, StoreError>;

    /// Drop the index on `keys` if it exists
    async fn drop_index(&self, ns: &Namespace, keys: &[&str]) -> Result<(), StoreError>;

    /// Drop a collection and its indexes
    async fn drop_collection(&self, ns: &Namespace) -> Result<(), StoreError>;

    /// Fast record count
    async fn estimated_count(&self, ns: &Namespace) -> Result<u64, StoreError>;

    /// Copy `from` into `to`, replacing the target; returns records copied
    async fn aggregate_out(&self, from: &Namespace, to: &Namespace) -> Result<u64, StoreError>;

    /// Server status snapshot
    async fn server_status(&self) -> Result<Value, StoreError>;
}

/// Index name in the `field_1_other_1` convention
pub fn index_name(keys: &[&str]) -> String {
    keys.iter()
        .map(|k| format!("{k}_1"))
        .collect::<Vec<_>>()
        .join("_")
}
