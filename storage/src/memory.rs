//! In-process record store
//!
//! [`MemoryStore`] keeps every namespace as an ordered map from `_id` to
//! record behind a single `tokio::sync::RwLock`. Each call takes the lock
//! once, so concurrent updates to one record are applied one after another.

use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use unibench_core::record::compare_values;
use unibench_core::store::index_name;
use unibench_core::{
    FieldValue, Filter, FindOptions, Namespace, Record, RecordStore, StoreError, Update, UpdateOp,
    UpdateOutcome,
};

/// Name of the implicit primary index
const ID_INDEX: &str = "_id_";

// ============================================================================
// Keys and collections
// ============================================================================

/// `_id` wrapper ordered by value, so `5` and `5i64` address the same record
#[derive(Debug, Clone)]
struct Key(FieldValue);

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}

#[derive(Debug, Default)]
struct Collection {
    records: BTreeMap<Key, Record>,
    indexes: BTreeSet<String>,
}

impl Collection {
    fn first_match(&self, filter: &Filter) -> Option<Key> {
        if let Some(id) = filter.id_equality() {
            let key = Key(id.clone());
            return self
                .records
                .get(&key)
                .filter(|r| filter.matches(r))
                .map(|_| key);
        }
        self.records
            .iter()
            .find(|(_, r)| filter.matches(r))
            .map(|(k, _)| k.clone())
    }

    fn insert(&mut self, ns: &Namespace, record: Record) -> Result<(), StoreError> {
        let id = record
            .get("_id")
            .cloned()
            .ok_or_else(|| StoreError::Backend("record without _id".to_string()))?;
        match self.records.entry(Key(id)) {
            Entry::Occupied(e) => Err(StoreError::DuplicateKey {
                namespace: ns.to_string(),
                key: render(&e.key().0),
            }),
            Entry::Vacant(e) => {
                e.insert(record);
                Ok(())
            }
        }
    }
}

fn render(value: &FieldValue) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}

/// Put `id` first and drop any other `_id`
fn with_leading_id(id: FieldValue, record: Record) -> Record {
    std::iter::once(("_id".to_string(), id))
        .chain(
            record
                .iter()
                .filter(|(k, _)| *k != "_id")
                .map(|(k, v)| (k.to_string(), v.clone())),
        )
        .collect()
}

/// Equality clauses of a filter, used to seed an upserted record
fn seed_from_filter(filter: &Filter, into: &mut Record) {
    match filter {
        Filter::Eq(field, value) => {
            into.insert(field.clone(), value.clone());
        }
        Filter::And(parts) => parts.iter().for_each(|p| seed_from_filter(p, into)),
        _ => {}
    }
}

fn narrow(value: i64) -> FieldValue {
    i32::try_from(value).map_or(FieldValue::Int64(value), FieldValue::Int32)
}

fn add_numeric(value: &FieldValue, by: i64) -> Option<FieldValue> {
    match value {
        FieldValue::Int32(v) => i64::from(*v).checked_add(by).map(narrow),
        FieldValue::Int64(v) => v.checked_add(by).map(FieldValue::Int64),
        FieldValue::Double(v) => Some(FieldValue::Double(v + by as f64)),
        _ => None,
    }
}

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Default)]
struct OpCounters {
    insert: AtomicU64,
    query: AtomicU64,
    update: AtomicU64,
    delete: AtomicU64,
    command: AtomicU64,
    add_expressions: AtomicU64,
}

impl OpCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, AtomicOrdering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(AtomicOrdering::Relaxed)
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// Record store held entirely in memory
pub struct MemoryStore {
    name: String,
    collections: RwLock<HashMap<Namespace, Collection>>,
    counters: OpCounters,
    next_id: AtomicU64,
    started: Instant,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store named `memory`
    pub fn new() -> Self {
        Self::with_name("memory")
    }

    /// Create an empty store with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
            counters: OpCounters::default(),
            next_id: AtomicU64::new(1),
            started: Instant::now(),
        }
    }

    /// Index names on a namespace, primary index first
    pub async fn indexes(&self, ns: &Namespace) -> Vec<String> {
        let collections = self.collections.read().await;
        match collections.get(ns) {
            Some(coll) => std::iter::once(ID_INDEX.to_string())
                .chain(coll.indexes.iter().cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    fn generate_id(&self) -> FieldValue {
        let n = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let mut oid = [0u8; 12];
        oid[4..].copy_from_slice(&n.to_be_bytes());
        FieldValue::ObjectId(oid)
    }

    fn ensure_id(&self, record: Record) -> Record {
        if record.contains_key("_id") {
            record
        } else {
            with_leading_id(self.generate_id(), record)
        }
    }

    fn apply_update(
        &self,
        record: &mut Record,
        update: &Update,
        inserting: bool,
    ) -> Result<(), StoreError> {
        for op in &update.ops {
            match op {
                UpdateOp::Inc(field, by) => {
                    reject_id(field)?;
                    let next = match record.get(field) {
                        None => narrow(*by),
                        Some(current) => add_numeric(current, *by).ok_or_else(|| {
                            StoreError::InvalidUpdate(format!(
                                "cannot apply $inc to {field}: {}",
                                render(current)
                            ))
                        })?,
                    };
                    record.insert(field.clone(), next);
                }
                UpdateOp::Set(field, value) => {
                    reject_id(field)?;
                    record.insert(field.clone(), value.clone());
                }
                UpdateOp::Add(field, by) => {
                    reject_id(field)?;
                    OpCounters::bump(&self.counters.add_expressions, 1);
                    let next = match record.get(field) {
                        None | Some(FieldValue::Null) => FieldValue::Null,
                        Some(current) => add_numeric(current, *by).ok_or_else(|| {
                            StoreError::InvalidUpdate(format!(
                                "$add on non-numeric field {field}"
                            ))
                        })?,
                    };
                    record.insert(field.clone(), next);
                }
                UpdateOp::SetOnInsert(fields) if inserting => {
                    for (name, value) in fields.iter() {
                        if name == "_id" && record.contains_key("_id") {
                            continue;
                        }
                        record.insert(name, value.clone());
                    }
                }
                UpdateOp::SetOnInsert(_) => {}
            }
        }
        Ok(())
    }

    /// Shared body of `update_one` and `find_one_and_update`
    async fn update_first(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<(UpdateOutcome, Option<Record>), StoreError> {
        OpCounters::bump(&self.counters.update, 1);
        let mut collections = self.collections.write().await;

        if let Some(coll) = collections.get_mut(ns) {
            if let Some(record) = coll
                .first_match(filter)
                .and_then(|key| coll.records.get_mut(&key))
            {
                let mut next = record.clone();
                self.apply_update(&mut next, update, false)?;
                let modified = next != *record;
                if modified {
                    *record = next;
                }
                let outcome = UpdateOutcome {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted: false,
                };
                return Ok((outcome, Some(record.clone())));
            }
        }

        if !upsert {
            return Ok((UpdateOutcome::default(), None));
        }

        let mut seed = Record::new();
        seed_from_filter(filter, &mut seed);
        self.apply_update(&mut seed, update, true)?;
        let record = self.ensure_id(seed);
        collections
            .entry(ns.clone())
            .or_default()
            .insert(ns, record.clone())?;

        let outcome = UpdateOutcome {
            matched: 0,
            modified: 0,
            upserted: true,
        };
        Ok((outcome, Some(record)))
    }
}

fn reject_id(field: &str) -> Result<(), StoreError> {
    if field == "_id" {
        return Err(StoreError::InvalidUpdate(
            "_id is immutable".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_many(&self, ns: &Namespace, records: Vec<Record>) -> Result<usize, StoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections.entry(ns.clone()).or_default();

        // Ordered insert: stop at the first failure, keep what went in.
        let mut inserted = 0;
        for record in records {
            let record = self.ensure_id(record);
            let result = coll.insert(ns, record);
            OpCounters::bump(&self.counters.insert, 1);
            result?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_one(&self, ns: &Namespace, record: Record) -> Result<(), StoreError> {
        let record = self.ensure_id(record);
        let mut collections = self.collections.write().await;
        OpCounters::bump(&self.counters.insert, 1);
        collections.entry(ns.clone()).or_default().insert(ns, record)
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Record>, StoreError> {
        OpCounters::bump(&self.counters.query, 1);
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(ns) else {
            return Ok(Vec::new());
        };

        let matches: Box<dyn Iterator<Item = &Record> + '_> = match filter.id_equality() {
            Some(id) => Box::new(
                coll.records
                    .get(&Key(id.clone()))
                    .filter(|r| filter.matches(r))
                    .into_iter(),
            ),
            None => Box::new(coll.records.values().filter(|r| filter.matches(r))),
        };

        Ok(matches
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|r| match &options.projection {
                Some(fields) => r.project(fields),
                None => r.clone(),
            })
            .collect())
    }

    async fn update_one(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        let (outcome, _) = self.update_first(ns, filter, update, upsert).await?;
        Ok(outcome)
    }

    async fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Record>, StoreError> {
        let (_, record) = self.update_first(ns, filter, update, upsert).await?;
        Ok(record)
    }

    async fn replace_one(
        &self,
        ns: &Namespace,
        filter: &Filter,
        replacement: Record,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        OpCounters::bump(&self.counters.update, 1);
        let mut collections = self.collections.write().await;

        if let Some(coll) = collections.get_mut(ns) {
            if let Some((key, record)) = coll
                .first_match(filter)
                .and_then(|key| coll.records.get_mut(&key).map(|r| (key, r)))
            {
                if let Some(id) = replacement.get("_id") {
                    if compare_values(id, &key.0) != Ordering::Equal {
                        return Err(StoreError::InvalidUpdate(
                            "replacement would change _id".to_string(),
                        ));
                    }
                }
                let next = with_leading_id(key.0.clone(), replacement);
                let modified = next != *record;
                *record = next;
                return Ok(UpdateOutcome {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted: false,
                });
            }
        }

        if !upsert {
            return Ok(UpdateOutcome::default());
        }

        let record = match (replacement.get("_id"), filter.id_equality()) {
            (Some(_), _) => replacement,
            (None, Some(id)) => with_leading_id(id.clone(), replacement),
            (None, None) => self.ensure_id(replacement),
        };
        collections
            .entry(ns.clone())
            .or_default()
            .insert(ns, record)?;

        Ok(UpdateOutcome {
            matched: 0,
            modified: 0,
            upserted: true,
        })
    }

    async fn delete_many(&self, ns: &Namespace, filter: &Filter) -> Result<u64, StoreError> {
        OpCounters::bump(&self.counters.delete, 1);
        let mut collections = self.collections.write().await;
        let Some(coll) = collections.get_mut(ns) else {
            return Ok(0);
        };

        let before = coll.records.len();
        coll.records.retain(|_, r| !filter.matches(r));
        Ok((before - coll.records.len()) as u64)
    }

    async fn create_index(&self, ns: &Namespace, keys: &[&str]) -> Result<String, StoreError> {
        if keys.is_empty() {
            return Err(StoreError::Backend("index needs at least one key".to_string()));
        }
        OpCounters::bump(&self.counters.command, 1);
        let name = index_name(keys);
        let mut collections = self.collections.write().await;
        collections
            .entry(ns.clone())
            .or_default()
            .indexes
            .insert(name.clone());
        Ok(name)
    }

    async fn drop_index(&self, ns: &Namespace, keys: &[&str]) -> Result<(), StoreError> {
        OpCounters::bump(&self.counters.command, 1);
        let name = index_name(keys);
        let mut collections = self.collections.write().await;
        if let Some(coll) = collections.get_mut(ns) {
            coll.indexes.remove(&name);
        }
        Ok(())
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<(), StoreError> {
        OpCounters::bump(&self.counters.command, 1);
        self.collections.write().await.remove(ns);
        Ok(())
    }

    async fn estimated_count(&self, ns: &Namespace) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(ns).map_or(0, |c| c.records.len() as u64))
    }

    async fn aggregate_out(&self, from: &Namespace, to: &Namespace) -> Result<u64, StoreError> {
        OpCounters::bump(&self.counters.command, 1);
        let mut collections = self.collections.write().await;
        let copied = collections
            .get(from)
            .map(|c| c.records.clone())
            .unwrap_or_default();
        let count = copied.len() as u64;

        // The target keeps its indexes; only the records are replaced.
        collections.entry(to.clone()).or_default().records = copied;
        Ok(count)
    }

    async fn server_status(&self) -> Result<Value, StoreError> {
        OpCounters::bump(&self.counters.command, 1);
        let collections = self.collections.read().await;
        let documents: usize = collections.values().map(|c| c.records.len()).sum();
        let data_size: usize = collections
            .values()
            .flat_map(|c| c.records.values())
            .map(Record::encoded_len)
            .sum();

        let c = &self.counters;
        Ok(json!({
            "host": self.name,
            "process": "unibench-memory",
            "version": env!("CARGO_PKG_VERSION"),
            "localTime": Utc::now().to_rfc3339(),
            "uptimeMillis": self.started.elapsed().as_millis() as u64,
            "opcounters": {
                "insert": OpCounters::get(&c.insert),
                "query": OpCounters::get(&c.query),
                "update": OpCounters::get(&c.update),
                "delete": OpCounters::get(&c.delete),
                "command": OpCounters::get(&c.command),
            },
            "storage": {
                "collections": collections.len(),
                "documents": documents,
                "dataSize": data_size,
            },
            "metrics": {
                "operatorCounters": {
                    "match": { "$eq": OpCounters::get(&c.query), "$where": 0 },
                    "expressions": {
                        "$add": OpCounters::get(&c.add_expressions),
                        "$function": 0,
                    },
                    "groupAccumulators": { "$sum": 0, "$accumulator": 0 },
                }
            }
        }))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ns() -> Namespace {
        Namespace::new("bench", "docs")
    }

    fn doc(id: i32) -> Record {
        Record::new().with("_id", id).with("count", 0i32)
    }

    async fn seeded(n: i32) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_many(&ns(), (0..n).map(doc).collect())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = seeded(3).await;

        let err = store.insert_one(&ns(), doc(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));

        // Ordered: records before the duplicate stay inserted.
        let err = store
            .insert_many(&ns(), vec![doc(10), doc(2), doc(11)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert_eq!(store.estimated_count(&ns()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_insert_generates_missing_id() {
        let store = MemoryStore::new();
        store
            .insert_many(&ns(), vec![Record::new().with("a", 1i32), Record::new().with("a", 2i32)])
            .await
            .unwrap();

        let all = store.find(&ns(), &Filter::All, &FindOptions::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all
            .iter()
            .all(|r| matches!(r.get("_id"), Some(FieldValue::ObjectId(_)))));
        assert_eq!(all[0].iter().next().map(|(k, _)| k), Some("_id"));
    }

    #[tokio::test]
    async fn test_id_lookup_ignores_integer_width() {
        let store = seeded(5).await;
        let found = store
            .find(&ns(), &Filter::eq("_id", 3i64), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_find_skip_limit_projection() {
        let store = MemoryStore::new();
        let records = (0..10)
            .map(|i| Record::new().with("_id", i).with("group", i % 2).with("pad", "x"))
            .collect();
        store.insert_many(&ns(), records).await.unwrap();

        let options = FindOptions {
            limit: Some(2),
            skip: 1,
            projection: Some(vec!["group".to_string()]),
        };
        let found = store.find(&ns(), &Filter::eq("group", 0i32), &options).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].get("_id"), Some(&FieldValue::Int32(2)));
        assert_eq!(found[1].get("_id"), Some(&FieldValue::Int32(4)));
        assert!(!found[0].contains_key("pad"));
    }

    #[tokio::test]
    async fn test_update_inc_and_noop() {
        let store = seeded(2).await;
        let filter = Filter::eq("_id", 1i32);

        let outcome = store
            .update_one(&ns(), &filter, &Update::new().inc("count", 2).inc("intfield1", 1), false)
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 1, upserted: false });

        let outcome = store
            .update_one(&ns(), &filter, &Update::new().set("count", 2i32), false)
            .await
            .unwrap();
        assert_eq!(outcome.modified, 0);

        let missing = store
            .update_one(&ns(), &Filter::eq("_id", 99i32), &Update::new().inc("count", 1), false)
            .await
            .unwrap();
        assert_eq!(missing, UpdateOutcome::default());
    }

    #[tokio::test]
    async fn test_add_expression_keeps_missing_field_null() {
        let store = seeded(1).await;
        let post = store
            .find_one_and_update(
                &ns(),
                &Filter::eq("_id", 0i32),
                &Update::new().add("count", 5).add("intfield1", 1),
                false,
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(post.get("count"), Some(&FieldValue::Int32(5)));
        assert_eq!(post.get("intfield1"), Some(&FieldValue::Null));
    }

    #[tokio::test]
    async fn test_inc_on_string_is_rejected_atomically() {
        let store = MemoryStore::new();
        store
            .insert_one(&ns(), Record::new().with("_id", 1i32).with("n", 1i32).with("s", "x"))
            .await
            .unwrap();

        let err = store
            .update_one(&ns(), &Filter::eq("_id", 1i32), &Update::new().inc("n", 1).inc("s", 1), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate(_)));

        let found = store.find(&ns(), &Filter::All, &FindOptions::default()).await.unwrap();
        assert_eq!(found[0].get("n"), Some(&FieldValue::Int32(1)));
    }

    #[tokio::test]
    async fn test_upsert_applies_set_on_insert_once() {
        let store = MemoryStore::new();
        let update = Update::new()
            .inc("count", 1)
            .set_on_insert(Record::new().with("_id", 500i32).with("name", "fresh"));
        let filter = Filter::eq("_id", 7i32);

        let inserted = store
            .find_one_and_update(&ns(), &filter, &update, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inserted.get("_id"), Some(&FieldValue::Int32(7)));
        assert_eq!(inserted.get("count"), Some(&FieldValue::Int32(1)));
        assert_eq!(inserted.get("name"), Some(&FieldValue::String("fresh".into())));

        let outcome = store.update_one(&ns(), &filter, &update, true).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 1, upserted: false });
        assert_eq!(store.estimated_count(&ns()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_keeps_id_and_upserts() {
        let store = seeded(1).await;
        let outcome = store
            .replace_one(&ns(), &Filter::eq("_id", 0i32), Record::new().with("v", 1i32), false)
            .await
            .unwrap();
        assert_eq!(outcome.modified, 1);

        let outcome = store
            .replace_one(&ns(), &Filter::eq("_id", 9i32), Record::new().with("v", 2i32), true)
            .await
            .unwrap();
        assert!(outcome.upserted);

        let all = store.find(&ns(), &Filter::All, &FindOptions::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].get("v"), Some(&FieldValue::Int32(1)));
        assert_eq!(all[1].get("_id"), Some(&FieldValue::Int32(9)));
    }

    #[tokio::test]
    async fn test_delete_and_counts() {
        let store = seeded(10).await;
        let deleted = store
            .delete_many(&ns(), &Filter::gte("_id", 6i32))
            .await
            .unwrap();
        assert_eq!(deleted, 4);
        assert_eq!(store.estimated_count(&ns()).await.unwrap(), 6);
        assert_eq!(
            store.delete_many(&Namespace::new("x", "y"), &Filter::All).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_indexes_and_drop() {
        let store = seeded(1).await;
        let name = store.create_index(&ns(), &["_id", "count"]).await.unwrap();
        assert_eq!(name, "_id_1_count_1");
        assert_eq!(store.indexes(&ns()).await, vec!["_id_", "_id_1_count_1"]);

        store.drop_index(&ns(), &["_id", "count"]).await.unwrap();
        store.drop_index(&ns(), &["_id", "count"]).await.unwrap();
        assert_eq!(store.indexes(&ns()).await, vec!["_id_"]);

        store.drop_collection(&ns()).await.unwrap();
        assert!(store.indexes(&ns()).await.is_empty());
        assert_eq!(store.estimated_count(&ns()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_aggregate_out_replaces_target() {
        let store = seeded(5).await;
        let target = ns().sibling("copy");
        store.insert_one(&target, doc(100)).await.unwrap();
        store.create_index(&target, &["intfield1"]).await.unwrap();

        let copied = store.aggregate_out(&ns(), &target).await.unwrap();

        assert_eq!(copied, 5);
        assert_eq!(store.estimated_count(&target).await.unwrap(), 5);
        assert!(store.indexes(&target).await.contains(&"intfield1_1".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_serialized() {
        let store = Arc::new(seeded(1).await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    store
                        .update_one(&ns(), &Filter::eq("_id", 0i32), &Update::new().inc("count", 1), false)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let found = store.find(&ns(), &Filter::All, &FindOptions::default()).await.unwrap();
        assert_eq!(found[0].get("count"), Some(&FieldValue::Int32(200)));
    }

    #[tokio::test]
    async fn test_server_status_counts_operations() {
        let store = seeded(3).await;
        store
            .find(&ns(), &Filter::All, &FindOptions::default())
            .await
            .unwrap();
        store
            .update_one(&ns(), &Filter::eq("_id", 0i32), &Update::new().inc("count", 1), false)
            .await
            .unwrap();

        let status = store.server_status().await.unwrap();
        assert_eq!(status["opcounters"]["insert"], 3);
        assert_eq!(status["opcounters"]["query"], 1);
        assert_eq!(status["opcounters"]["update"], 1);
        assert_eq!(status["storage"]["documents"], 3);
        assert!(status["metrics"]["operatorCounters"]["match"].get("$where").is_some());
    }
}
