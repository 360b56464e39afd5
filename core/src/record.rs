//! Synthetic record model
//!
//! A [`Record`] is an ordered list of named [`FieldValue`]s. Records convert
//! to and from `bson` documents, and [`Record::encoded_len`] predicts the
//! encoded size without encoding so the synthesizer can grow records cheaply.

use std::cmp::Ordering;

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// A single dynamically typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// IEEE-754 double
    Double(f64),
    /// UTF-8 string
    String(String),
    /// UTC datetime as milliseconds since the Unix epoch
    DateTime(i64),
    /// UUID stored as binary subtype 4
    Uuid(Uuid),
    /// 12-byte object identifier
    ObjectId([u8; 12]),
    /// Ordered list of values
    Array(Vec<FieldValue>),
    /// Nested record
    Document(Record),
}

impl FieldValue {
    /// Encoded size of the value payload, excluding tag and field name
    pub fn encoded_len(&self) -> usize {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Int32(_) => 4,
            FieldValue::Int64(_) | FieldValue::Double(_) | FieldValue::DateTime(_) => 8,
            FieldValue::String(s) => 4 + s.len() + 1,
            FieldValue::Uuid(_) => 4 + 1 + 16,
            FieldValue::ObjectId(_) => 12,
            FieldValue::Array(items) => {
                4 + items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| element_len(&i.to_string(), v))
                    .sum::<usize>()
                    + 1
            }
            FieldValue::Document(doc) => doc.encoded_len(),
        }
    }

    /// Convert to the driver's value type
    pub fn to_bson(&self) -> Bson {
        match self {
            FieldValue::Null => Bson::Null,
            FieldValue::Bool(b) => Bson::Boolean(*b),
            FieldValue::Int32(v) => Bson::Int32(*v),
            FieldValue::Int64(v) => Bson::Int64(*v),
            FieldValue::Double(v) => Bson::Double(*v),
            FieldValue::String(s) => Bson::String(s.clone()),
            FieldValue::DateTime(ms) => Bson::DateTime(bson::DateTime::from_millis(*ms)),
            FieldValue::Uuid(u) => Bson::Binary(Binary {
                subtype: BinarySubtype::Uuid,
                bytes: u.as_bytes().to_vec(),
            }),
            FieldValue::ObjectId(oid) => Bson::ObjectId(bson::oid::ObjectId::from_bytes(*oid)),
            FieldValue::Array(items) => Bson::Array(items.iter().map(Self::to_bson).collect()),
            FieldValue::Document(doc) => Bson::Document(doc.to_document()),
        }
    }

    /// Convert from the driver's value type
    ///
    /// Types without a direct counterpart go through relaxed extended JSON.
    pub fn from_bson(value: Bson) -> FieldValue {
        match value {
            Bson::Null => FieldValue::Null,
            Bson::Boolean(b) => FieldValue::Bool(b),
            Bson::Int32(v) => FieldValue::Int32(v),
            Bson::Int64(v) => FieldValue::Int64(v),
            Bson::Double(v) => FieldValue::Double(v),
            Bson::String(s) => FieldValue::String(s),
            Bson::DateTime(dt) => FieldValue::DateTime(dt.timestamp_millis()),
            Bson::ObjectId(oid) => FieldValue::ObjectId(oid.bytes()),
            Bson::Binary(Binary {
                subtype: BinarySubtype::Uuid,
                bytes,
            }) if bytes.len() == 16 => match Uuid::from_slice(&bytes) {
                Ok(u) => FieldValue::Uuid(u),
                Err(_) => FieldValue::Null,
            },
            Bson::Array(items) => FieldValue::Array(items.into_iter().map(Self::from_bson).collect()),
            Bson::Document(doc) => FieldValue::Document(Record::from_document(doc)),
            other => FieldValue::from_json(&other.into_relaxed_extjson()),
        }
    }

    /// Convert a JSON value, choosing the narrowest integer type that fits
    pub fn from_json(value: &serde_json::Value) -> FieldValue {
        use serde_json::Value;
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => FieldValue::Int32(small),
                        Err(_) => FieldValue::Int64(i),
                    }
                } else {
                    FieldValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => FieldValue::Document(Record::from_json_map(map)),
        }
    }

    /// Numeric view used for cross-type comparison and arithmetic
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int32(v) => Some(f64::from(*v)),
            FieldValue::Int64(v) => Some(*v as f64),
            FieldValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view, if this value is an integer type
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int32(v) => Some(i64::from(*v)),
            FieldValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    // Canonical sort order across types; numbers compare with each other.
    fn type_rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Int32(_) | FieldValue::Int64(_) | FieldValue::Double(_) => 1,
            FieldValue::String(_) => 2,
            FieldValue::Document(_) => 3,
            FieldValue::Array(_) => 4,
            FieldValue::Uuid(_) => 5,
            FieldValue::ObjectId(_) => 6,
            FieldValue::Bool(_) => 7,
            FieldValue::DateTime(_) => 8,
        }
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int32(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int64(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<Record> for FieldValue {
    fn from(v: Record) -> Self {
        FieldValue::Document(v)
    }
}

/// Total order over field values, used for keys, range filters and sorting
pub fn compare_values(a: &FieldValue, b: &FieldValue) -> Ordering {
    let rank = a.type_rank().cmp(&b.type_rank());
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
        (FieldValue::String(x), FieldValue::String(y)) => x.cmp(y),
        (FieldValue::Bool(x), FieldValue::Bool(y)) => x.cmp(y),
        (FieldValue::DateTime(x), FieldValue::DateTime(y)) => x.cmp(y),
        (FieldValue::Uuid(x), FieldValue::Uuid(y)) => x.cmp(y),
        (FieldValue::ObjectId(x), FieldValue::ObjectId(y)) => x.cmp(y),
        (FieldValue::Array(x), FieldValue::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| compare_values(l, r))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (FieldValue::Document(x), FieldValue::Document(y)) => x
            .iter()
            .zip(y.iter())
            .map(|((kl, vl), (kr, vr))| kl.cmp(kr).then_with(|| compare_values(vl, vr)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = a.as_f64().unwrap_or(f64::NAN);
                let y = b.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int32(v) => serializer.serialize_i32(*v),
            FieldValue::Int64(v) => serializer.serialize_i64(*v),
            FieldValue::Double(v) => serializer.serialize_f64(*v),
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::DateTime(ms) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$date", ms)?;
                map.end()
            }
            FieldValue::Uuid(u) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$uuid", &u.hyphenated().to_string())?;
                map.end()
            }
            FieldValue::ObjectId(oid) => {
                let hex: String = oid.iter().map(|b| format!("{b:02x}")).collect();
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$oid", &hex)?;
                map.end()
            }
            FieldValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Document(doc) => doc.serialize(serializer),
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// Ordered set of named fields
///
/// Field names are unique; [`Record::insert`] replaces an existing field in
/// place and appends new ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a field, returning the previous value
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    /// Get a field by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Get a mutable field by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Remove a field by name
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let pos = self.fields.iter().position(|(k, _)| k == name)?;
        Some(self.fields.remove(pos).1)
    }

    /// Whether the record has a field with this name
    pub fn contains_key(&self, name: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == name)
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Exact encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        4 + self
            .fields
            .iter()
            .map(|(k, v)| element_len(k, v))
            .sum::<usize>()
            + 1
    }

    /// Encode with the BSON encoder the database driver uses
    pub fn to_bytes(&self) -> Result<Vec<u8>, bson::ser::Error> {
        bson::to_vec(&self.to_document())
    }

    /// Convert to a driver document, keeping field order
    pub fn to_document(&self) -> Document {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_bson()))
            .collect()
    }

    /// Convert from a driver document
    pub fn from_document(document: Document) -> Record {
        Record {
            fields: document
                .into_iter()
                .map(|(k, v)| (k, FieldValue::from_bson(v)))
                .collect(),
        }
    }

    /// Build a record from a JSON object; `None` for any other JSON type
    pub fn from_json(value: &serde_json::Value) -> Option<Record> {
        value.as_object().map(Self::from_json_map)
    }

    fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Record {
        Record {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                .collect(),
        }
    }

    /// Render as JSON, using extended-JSON wrappers for non-JSON types
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Keep only the named fields (and `_id`)
    pub fn project(&self, fields: &[String]) -> Record {
        Record {
            fields: self
                .fields
                .iter()
                .filter(|(k, _)| k == "_id" || fields.iter().any(|f| f == k))
                .cloned()
                .collect(),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// Encoded size of one `name: value` element including tag and name terminator
///
/// Matches what [`Record::to_bytes`] produces, without encoding.
pub fn element_len(name: &str, value: &FieldValue) -> usize {
    1 + name.len() + 1 + value.encoded_len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_record_is_five_bytes() {
        let record = Record::new();
        assert_eq!(record.encoded_len(), 5);
        assert_eq!(record.to_bytes().unwrap(), vec![5, 0, 0, 0, 0]);
    }

    #[test]
    fn test_int32_layout() {
        let record = Record::new().with("a", 1i32);
        assert_eq!(
            record.to_bytes().unwrap(),
            vec![12, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_encoded_len_matches_bytes_for_nested_values() {
        let inner = Record::new()
            .with("s", "hello")
            .with("flag", true)
            .with("big", i64::MAX);
        let mut record = Record::new()
            .with("_id", FieldValue::Uuid(Uuid::nil()))
            .with("nested", inner);
        record.insert("when", FieldValue::DateTime(1_754_917_200_011));
        record.insert(
            "list",
            FieldValue::Array(vec![FieldValue::Int32(1), FieldValue::Null, "x".into()]),
        );
        record.insert("oid", FieldValue::ObjectId([7; 12]));
        record.insert("pi", FieldValue::Double(3.25));

        assert_eq!(record.encoded_len(), record.to_bytes().unwrap().len());
    }

    #[test]
    fn test_document_conversion_keeps_types_and_order() {
        let record = Record::new()
            .with("_id", FieldValue::Uuid(Uuid::from_u128(7)))
            .with("count", 3i32)
            .with("big", 5_000_000_000i64)
            .with("when", FieldValue::DateTime(1_754_917_200_011))
            .with("oid", FieldValue::ObjectId([1; 12]))
            .with("nested", Record::new().with("s", "x"));

        let document = record.to_document();
        let keys: Vec<&str> = document.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["_id", "count", "big", "when", "oid", "nested"]);
        assert_eq!(document.get_i32("count").unwrap(), 3);

        assert_eq!(Record::from_document(document), record);
    }

    #[test]
    fn test_unmapped_bson_types_fall_back_to_json() {
        let value = FieldValue::from_bson(Bson::Timestamp(bson::Timestamp {
            time: 1,
            increment: 2,
        }));
        assert!(matches!(value, FieldValue::Document(_)));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut record = Record::new().with("a", 1i32).with("b", 2i32);
        let previous = record.insert("a", 10i32);

        assert_eq!(previous, Some(FieldValue::Int32(1)));
        let names: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_from_json_picks_narrow_integers() {
        let record = Record::from_json(&json!({
            "small": 5,
            "large": 5_000_000_000i64,
            "ratio": 0.5,
            "tags": ["a"],
        }))
        .unwrap();

        assert_eq!(record.get("small"), Some(&FieldValue::Int32(5)));
        assert_eq!(record.get("large"), Some(&FieldValue::Int64(5_000_000_000)));
        assert_eq!(record.get("ratio"), Some(&FieldValue::Double(0.5)));
        assert!(matches!(record.get("tags"), Some(FieldValue::Array(_))));
        assert!(Record::from_json(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_compare_values_across_numeric_types() {
        assert_eq!(
            compare_values(&FieldValue::Int32(5), &FieldValue::Int64(5)),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(&FieldValue::Int64(4), &FieldValue::Double(4.5)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&FieldValue::Int32(1), &FieldValue::String("0".into())),
            Ordering::Less
        );
    }

    #[test]
    fn test_json_rendering_uses_extended_wrappers() {
        let record = Record::new()
            .with("_id", FieldValue::ObjectId([0xab; 12]))
            .with("at", FieldValue::DateTime(42));
        let value = record.to_json();

        assert_eq!(value["_id"]["$oid"], json!("abababababababababababab"));
        assert_eq!(value["at"]["$date"], json!(42));
    }

    #[test]
    fn test_project_keeps_id() {
        let record = Record::new()
            .with("_id", 1i32)
            .with("a", 2i32)
            .with("b", 3i32);
        let projected = record.project(&["b".to_string()]);

        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key("_id"));
        assert!(!projected.contains_key("a"));
    }
}
