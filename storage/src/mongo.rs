//! MongoDB record store
//!
//! [`MongoStore`] sends every [`RecordStore`] call to a live deployment through
//! the official driver. Typed filters and updates are translated into query
//! and update documents here; nothing else in the crate sees driver types.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection, IndexModel};
use serde_json::Value;

use unibench_core::store::{index_name, CmpOp};
use unibench_core::{
    Filter, FindOptions, Namespace, Record, RecordStore, StoreError, Update, UpdateOp,
    UpdateOutcome,
};

const DUPLICATE_KEY: i32 = 11000;
const INDEX_NOT_FOUND: i32 = 27;
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Record store backed by a MongoDB deployment
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    name: String,
}

impl MongoStore {
    /// Connect to `uri` and check the deployment answers a ping
    pub async fn connect(uri: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await.map_err(backend)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(backend)?;

        let name = client
            .default_database()
            .map(|db| format!("mongodb:{}", db.name()))
            .unwrap_or_else(|| "mongodb".to_string());
        tracing::info!(store = %name, "Connected to MongoDB");
        Ok(Self::from_client(client, name))
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    fn collection(&self, ns: &Namespace) -> Collection<Document> {
        self.client
            .database(&ns.database)
            .collection::<Document>(&ns.collection)
    }
}

fn backend(e: mongodb::error::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Server error code carried by a driver error, if any
fn error_code(e: &mongodb::error::Error) -> Option<i32> {
    match e.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::InsertMany(insert) => insert
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|write| write.code),
        _ => None,
    }
}

fn write_error(ns: &Namespace, e: mongodb::error::Error) -> StoreError {
    if error_code(&e) == Some(DUPLICATE_KEY) {
        return StoreError::DuplicateKey {
            namespace: ns.to_string(),
            key: e.to_string(),
        };
    }
    backend(e)
}

// ============================================================================
// Translation
// ============================================================================

fn operator(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Gt => "$gt",
        CmpOp::Gte => "$gte",
        CmpOp::Lt => "$lt",
        CmpOp::Lte => "$lte",
    }
}

fn single(key: impl Into<String>, value: impl Into<Bson>) -> Document {
    let mut document = Document::new();
    document.insert(key, value);
    document
}

/// Query document for a filter
pub fn filter_document(filter: &Filter) -> Document {
    match filter {
        Filter::All => Document::new(),
        Filter::Eq(field, value) => single(field.clone(), value.to_bson()),
        Filter::In(field, values) => {
            let values: Vec<Bson> = values.iter().map(|v| v.to_bson()).collect();
            single(field.clone(), single("$in", values))
        }
        Filter::Cmp(field, op, value) => {
            single(field.clone(), single(operator(*op), value.to_bson()))
        }
        Filter::And(parts) => {
            let parts: Vec<Bson> = parts
                .iter()
                .map(|p| Bson::Document(filter_document(p)))
                .collect();
            single("$and", parts)
        }
    }
}

/// Update document, or an aggregation pipeline when any op is an expression
pub fn update_modifications(update: &Update) -> Result<UpdateDocument, StoreError> {
    let pipeline = update.ops.iter().any(|op| matches!(op, UpdateOp::Add(..)));
    if pipeline {
        return pipeline_update(update).map(UpdateDocument::Pipeline);
    }

    let mut inc = Document::new();
    let mut set = Document::new();
    let mut on_insert = Document::new();
    for op in &update.ops {
        match op {
            UpdateOp::Inc(field, by) => {
                inc.insert(field.clone(), *by);
            }
            UpdateOp::Set(field, value) => {
                set.insert(field.clone(), value.to_bson());
            }
            UpdateOp::SetOnInsert(fields) => {
                for (name, value) in fields.iter() {
                    on_insert.insert(name, value.to_bson());
                }
            }
            UpdateOp::Add(..) => {}
        }
    }

    let mut modifications = Document::new();
    for (name, section) in [("$inc", inc), ("$set", set), ("$setOnInsert", on_insert)] {
        if !section.is_empty() {
            modifications.insert(name, section);
        }
    }
    if modifications.is_empty() {
        return Err(StoreError::InvalidUpdate("update has no operators".to_string()));
    }
    Ok(UpdateDocument::Operators(modifications))
}

fn pipeline_update(update: &Update) -> Result<Vec<Document>, StoreError> {
    let mut set = Document::new();
    for op in &update.ops {
        let (field, expression) = match op {
            UpdateOp::Add(field, by) => {
                let current = Bson::String(format!("${field}"));
                (field, single("$add", vec![current, Bson::Int64(*by)]))
            }
            UpdateOp::Inc(field, by) => {
                let current = Bson::String(format!("${field}"));
                let current = single("$ifNull", vec![current, Bson::Int32(0)]);
                (field, single("$add", vec![Bson::Document(current), Bson::Int64(*by)]))
            }
            UpdateOp::Set(field, value) => (field, single("$literal", value.to_bson())),
            UpdateOp::SetOnInsert(_) => {
                return Err(StoreError::InvalidUpdate(
                    "$setOnInsert cannot be combined with expression updates".to_string(),
                ))
            }
        };
        set.insert(field.clone(), expression);
    }
    Ok(vec![single("$set", set)])
}

/// Translated update, ready for the driver
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDocument {
    /// `$inc` / `$set` / `$setOnInsert` operators
    Operators(Document),
    /// Aggregation pipeline stages
    Pipeline(Vec<Document>),
}

impl From<UpdateDocument> for mongodb::options::UpdateModifications {
    fn from(update: UpdateDocument) -> Self {
        match update {
            UpdateDocument::Operators(document) => document.into(),
            UpdateDocument::Pipeline(stages) => stages.into(),
        }
    }
}

fn index_keys(keys: &[&str]) -> Document {
    keys.iter().map(|k| (k.to_string(), Bson::Int32(1))).collect()
}

fn projection(fields: &[String]) -> Document {
    fields.iter().map(|f| (f.clone(), Bson::Int32(1))).collect()
}

/// `$out` stage writing into `to`, which may live in another database
pub fn out_stage(from: &Namespace, to: &Namespace) -> Document {
    if from.database == to.database {
        single("$out", to.collection.clone())
    } else {
        let mut target = Document::new();
        target.insert("db", to.database.clone());
        target.insert("coll", to.collection.clone());
        single("$out", target)
    }
}

fn outcome(result: mongodb::results::UpdateResult) -> UpdateOutcome {
    UpdateOutcome {
        matched: result.matched_count,
        modified: result.modified_count,
        upserted: result.upserted_id.is_some(),
    }
}

// ============================================================================
// RecordStore
// ============================================================================

#[async_trait]
impl RecordStore for MongoStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_many(&self, ns: &Namespace, records: Vec<Record>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let documents: Vec<Document> = records.iter().map(Record::to_document).collect();
        let result = self
            .collection(ns)
            .insert_many(documents)
            .await
            .map_err(|e| write_error(ns, e))?;
        Ok(result.inserted_ids.len())
    }

    async fn insert_one(&self, ns: &Namespace, record: Record) -> Result<(), StoreError> {
        self.collection(ns)
            .insert_one(record.to_document())
            .await
            .map_err(|e| write_error(ns, e))?;
        Ok(())
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Record>, StoreError> {
        let collection = self.collection(ns);
        let mut find = collection
            .find(filter_document(filter))
            .skip(options.skip as u64);
        if let Some(limit) = options.limit {
            find = find.limit(limit as i64);
        }
        if let Some(fields) = &options.projection {
            find = find.projection(projection(fields));
        }

        let mut cursor = find.await.map_err(backend)?;
        let mut records = Vec::new();
        while cursor.advance().await.map_err(backend)? {
            let document = cursor.deserialize_current().map_err(backend)?;
            records.push(Record::from_document(document));
        }
        Ok(records)
    }

    async fn update_one(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        let result = self
            .collection(ns)
            .update_one(filter_document(filter), update_modifications(update)?)
            .upsert(upsert)
            .await
            .map_err(|e| write_error(ns, e))?;
        Ok(outcome(result))
    }

    async fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Record>, StoreError> {
        let document = self
            .collection(ns)
            .find_one_and_update(filter_document(filter), update_modifications(update)?)
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| write_error(ns, e))?;
        Ok(document.map(Record::from_document))
    }

    async fn replace_one(
        &self,
        ns: &Namespace,
        filter: &Filter,
        replacement: Record,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        let result = self
            .collection(ns)
            .replace_one(filter_document(filter), replacement.to_document())
            .upsert(upsert)
            .await
            .map_err(|e| write_error(ns, e))?;
        Ok(outcome(result))
    }

    async fn delete_many(&self, ns: &Namespace, filter: &Filter) -> Result<u64, StoreError> {
        let result = self
            .collection(ns)
            .delete_many(filter_document(filter))
            .await
            .map_err(backend)?;
        Ok(result.deleted_count)
    }

    async fn create_index(&self, ns: &Namespace, keys: &[&str]) -> Result<String, StoreError> {
        let model = IndexModel::builder().keys(index_keys(keys)).build();
        let result = self
            .collection(ns)
            .create_index(model)
            .await
            .map_err(backend)?;
        Ok(result.index_name)
    }

    async fn drop_index(&self, ns: &Namespace, keys: &[&str]) -> Result<(), StoreError> {
        match self.collection(ns).drop_index(index_name(keys)).await {
            Ok(()) => Ok(()),
            Err(e) if matches!(error_code(&e), Some(INDEX_NOT_FOUND | NAMESPACE_NOT_FOUND)) => {
                Ok(())
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<(), StoreError> {
        self.collection(ns).drop().await.map_err(backend)
    }

    async fn estimated_count(&self, ns: &Namespace) -> Result<u64, StoreError> {
        self.collection(ns)
            .estimated_document_count()
            .await
            .map_err(backend)
    }

    async fn aggregate_out(&self, from: &Namespace, to: &Namespace) -> Result<u64, StoreError> {
        let mut cursor = self
            .collection(from)
            .aggregate(vec![doc! { "$match": {} }, out_stage(from, to)])
            .await
            .map_err(backend)?;
        while cursor.advance().await.map_err(backend)? {}
        self.estimated_count(to).await
    }

    async fn server_status(&self) -> Result<Value, StoreError> {
        let status = self
            .client
            .database("admin")
            .run_command(doc! { "serverStatus": 1 })
            .await
            .map_err(backend)?;
        Ok(Bson::Document(status).into_relaxed_extjson())
    }
}
