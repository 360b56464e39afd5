//! Deterministic synthetic record generation
//!
//! A [`DocumentSynthesizer`] owns a seeded random stream and a pseudo-text
//! corpus. Each call to [`DocumentSynthesizer::create`] produces a record whose
//! encoded size reaches the configured target, overshooting by at most one
//! filler field.
//!
//! Two synthesizers built with the same seed and strategy produce identical
//! record sequences, except under [`IdStrategy::SequentialObjectId`] whose ids
//! embed wall-clock seconds.
//!
//! # Example
//!
//! ```ignore
//! let mut synth = DocumentSynthesizer::new(worker_index, IdStrategy::RandomUuid, 4096, None);
//! let record = synth.create(None);
//! assert!(record.encoded_len() >= 4096);
//! ```

mod ids;
mod text;

pub use ids::{IdKind, IdStrategy, DEFAULT_BUSINESS_ID_BUCKETS};
pub use text::{generate_text, TEXT_BUFFER_LEN};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::record::{element_len, FieldValue, Record};

use ids::IdGenerator;

/// Longest string filler, in bytes
const MAX_STRING_FILLER: usize = 32;

/// Lower bound of generated datefield values (ms since epoch)
const DATE_BASE_MS: i64 = 1_754_917_200_011;

/// Width of the datefield window (ms)
const DATE_SPAN_MS: i64 = 10_000_000_000;

/// Upper bound (exclusive) of generated intfield values
const INT_FIELD_BOUND: i32 = 100_000;

/// Name of the nested object that holds fillers past the per-object bound
pub const OVERFLOW_FIELD: &str = "overflow";

// Tag + "overflow" + NUL + empty document (length prefix and terminator).
const OVERFLOW_OVERHEAD: usize = 1 + OVERFLOW_FIELD.len() + 1 + 4 + 1;

#[derive(Clone, Copy)]
enum FillerKind {
    Int,
    Date,
    Text,
}

/// Builds fixed-size synthetic records from a seeded random stream
pub struct DocumentSynthesizer {
    seed: u64,
    rng: StdRng,
    ids: IdGenerator,
    target_size: usize,
    max_fields: Option<usize>,
    corpus: String,
}

impl DocumentSynthesizer {
    /// Create a synthesizer
    ///
    /// `seed` is normally the worker index; it also appears in business ids.
    /// `max_fields` bounds the number of fields per object and is ignored
    /// below 2, since each nested level needs room for its overflow field.
    pub fn new(
        seed: u64,
        strategy: IdStrategy,
        target_size: usize,
        max_fields: Option<usize>,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let corpus = generate_text(&mut rng, TEXT_BUFFER_LEN);
        let ids = IdGenerator::new(strategy, &mut rng);
        Self {
            seed,
            rng,
            ids,
            target_size,
            max_fields: max_fields.filter(|n| *n >= 2),
            corpus,
        }
    }

    /// Target encoded size in bytes
    pub fn target_size(&self) -> usize {
        self.target_size
    }

    /// Create one record
    ///
    /// Fields from `overrides` are copied in with their types intact; if they
    /// include `_id` no id is generated.
    pub fn create(&mut self, overrides: Option<&Record>) -> Record {
        let mut head = Record::new();

        let has_id = overrides.is_some_and(|o| o.contains_key("_id"));
        if !has_id {
            if let Some(id) = self.ids.next_id(&mut self.rng, self.seed) {
                head.insert("_id", id);
            }
        }
        if let Some(extra) = overrides {
            for (name, value) in extra.iter() {
                head.insert(name, value.clone());
            }
        }

        let mut size = head.encoded_len();
        let mut levels: Vec<Vec<(String, FieldValue)>> = vec![Vec::new()];
        let mut level_fields = head.len();
        let mut field_no = 1usize;
        let mut kind = FillerKind::Int;

        while size < self.target_size {
            if let Some(max) = self.max_fields {
                if level_fields + 1 >= max {
                    levels.push(Vec::new());
                    size += OVERFLOW_OVERHEAD;
                    level_fields = 0;
                }
            }

            let (name, value) = self.filler(kind, field_no);
            size += element_len(&name, &value);
            level_fields += 1;
            if let Some(level) = levels.last_mut() {
                level.push((name, value));
            }

            kind = match kind {
                FillerKind::Int => FillerKind::Date,
                FillerKind::Date => FillerKind::Text,
                FillerKind::Text => {
                    field_no += 1;
                    FillerKind::Int
                }
            };
        }

        Self::assemble(head, levels)
    }

    fn filler(&mut self, kind: FillerKind, n: usize) -> (String, FieldValue) {
        match kind {
            FillerKind::Int => (
                format!("intfield{n}"),
                FieldValue::Int32(self.rng.gen_range(0..INT_FIELD_BOUND)),
            ),
            FillerKind::Date => (
                format!("datefield{n}"),
                FieldValue::DateTime(DATE_BASE_MS + self.rng.gen_range(0..DATE_SPAN_MS)),
            ),
            FillerKind::Text => {
                let len = self.rng.gen_range(1..=MAX_STRING_FILLER);
                let offset = self
                    .rng
                    .gen_range(0..self.corpus.len() - MAX_STRING_FILLER);
                (
                    format!("stringfield{n}"),
                    FieldValue::String(self.corpus[offset..offset + len].to_string()),
                )
            }
        }
    }

    // Innermost level first; each outer level gains an `overflow` field.
    fn assemble(mut head: Record, mut levels: Vec<Vec<(String, FieldValue)>>) -> Record {
        let mut nested: Option<Record> = None;
        while levels.len() > 1 {
            let Some(fields) = levels.pop() else { break };
            let mut level: Record = fields.into_iter().collect();
            if let Some(inner) = nested.take() {
                level.insert(OVERFLOW_FIELD, inner);
            }
            nested = Some(level);
        }
        for (name, value) in levels.into_iter().flatten() {
            head.insert(name, value);
        }
        if let Some(inner) = nested {
            head.insert(OVERFLOW_FIELD, inner);
        }
        head
    }
}

impl std::fmt::Debug for DocumentSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSynthesizer")
            .field("seed", &self.seed)
            .field("target_size", &self.target_size)
            .field("max_fields", &self.max_fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn depth(record: &Record) -> usize {
        match record.get(OVERFLOW_FIELD) {
            Some(FieldValue::Document(inner)) => 1 + depth(inner),
            _ => 0,
        }
    }

    fn max_width(record: &Record) -> usize {
        match record.get(OVERFLOW_FIELD) {
            Some(FieldValue::Document(inner)) => record.len().max(max_width(inner)),
            _ => record.len(),
        }
    }

    #[test]
    fn test_same_seed_is_byte_identical() {
        for strategy in [
            IdStrategy::RandomUuid,
            IdStrategy::BoundedBusinessId { buckets: 50 },
            IdStrategy::None,
        ] {
            let mut a = DocumentSynthesizer::new(3, strategy, 2048, None);
            let mut b = DocumentSynthesizer::new(3, strategy, 2048, None);
            for _ in 0..20 {
                assert_eq!(a.create(None).to_bytes().unwrap(), b.create(None).to_bytes().unwrap());
            }
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let mut a = DocumentSynthesizer::new(1, IdStrategy::RandomUuid, 512, None);
        let mut b = DocumentSynthesizer::new(2, IdStrategy::RandomUuid, 512, None);
        assert_ne!(a.create(None).to_bytes().unwrap(), b.create(None).to_bytes().unwrap());
    }

    #[test]
    fn test_size_reaches_target_with_bounded_overshoot() {
        let mut synth = DocumentSynthesizer::new(0, IdStrategy::RandomUuid, 4096, None);
        for _ in 0..50 {
            let len = synth.create(None).encoded_len();
            assert!(len >= 4096);
            // Largest filler: "stringfieldNNN" plus a 32-byte payload.
            assert!(len < 4096 + 64);
        }
    }

    #[test]
    fn test_tiny_target_still_gets_id() {
        let mut synth = DocumentSynthesizer::new(0, IdStrategy::RandomUuid, 1, None);
        let record = synth.create(None);
        assert!(record.contains_key("_id"));
        assert!(record.encoded_len() >= 1);
    }

    #[test]
    fn test_filler_order_and_types() {
        let mut synth = DocumentSynthesizer::new(5, IdStrategy::None, 200, None);
        let record = synth.create(None);
        let names: Vec<&str> = record.iter().map(|(k, _)| k).take(4).collect();

        assert_eq!(names, vec!["intfield1", "datefield1", "stringfield1", "intfield2"]);
        match record.get("intfield1") {
            Some(FieldValue::Int32(v)) => assert!((0..100_000).contains(v)),
            other => panic!("unexpected intfield1: {other:?}"),
        }
        match record.get("stringfield1") {
            Some(FieldValue::String(s)) => assert!((1..=32).contains(&s.len())),
            other => panic!("unexpected stringfield1: {other:?}"),
        }
    }

    #[test]
    fn test_overrides_keep_types_and_suppress_id() {
        let overrides = Record::new()
            .with("_id", 42i64)
            .with("group", 7i32)
            .with("label", "fixed");
        let mut synth = DocumentSynthesizer::new(0, IdStrategy::RandomUuid, 256, None);
        let record = synth.create(Some(&overrides));

        assert_eq!(record.get("_id"), Some(&FieldValue::Int64(42)));
        assert_eq!(record.get("group"), Some(&FieldValue::Int32(7)));
        assert_eq!(record.get("label"), Some(&FieldValue::from("fixed")));
    }

    #[test]
    fn test_business_ids_never_repeat() {
        let mut synth =
            DocumentSynthesizer::new(7, IdStrategy::BoundedBusinessId { buckets: 10 }, 16, None);
        let mut seen = HashSet::new();
        for _ in 0..5000 {
            let record = synth.create(None);
            let Some(FieldValue::String(id)) = record.get("_id") else {
                panic!("business id must be a string");
            };
            assert!(id.starts_with("ACC"));
            assert!(id.ends_with("007"));
            assert!(seen.insert(id.clone()), "duplicate id {id}");
        }
    }

    #[test]
    fn test_object_ids_are_distinct() {
        let mut synth = DocumentSynthesizer::new(1, IdStrategy::SequentialObjectId, 16, None);
        let a = synth.create(None);
        let b = synth.create(None);
        assert!(matches!(a.get("_id"), Some(FieldValue::ObjectId(_))));
        assert_ne!(a.get("_id"), b.get("_id"));
    }

    #[test]
    fn test_max_fields_nests_overflow() {
        let mut synth = DocumentSynthesizer::new(2, IdStrategy::RandomUuid, 4096, Some(10));
        let record = synth.create(None);

        assert!(depth(&record) >= 1);
        assert!(max_width(&record) <= 10);
        assert!(record.encoded_len() >= 4096);
        assert!(record.encoded_len() < 4096 + 96);
    }

    #[test]
    fn test_max_fields_below_two_is_unbounded() {
        let mut synth = DocumentSynthesizer::new(2, IdStrategy::RandomUuid, 1024, Some(1));
        let record = synth.create(None);
        assert_eq!(depth(&record), 0);
    }
}
