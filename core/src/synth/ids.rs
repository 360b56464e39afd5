//! `_id` generation strategies

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::record::FieldValue;

/// Default number of customer buckets for business ids
pub const DEFAULT_BUSINESS_ID_BUCKETS: u32 = 20_000;

/// How a synthesizer fills `_id` when the caller does not supply one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdKind {
    /// Random version-4 UUID
    #[default]
    Uuid,
    /// `ACC<bucket>_<seq><worker>` strings
    BusinessId,
    /// Time-prefixed 12-byte object ids
    ObjectId,
    /// No `_id`; the store assigns one
    None,
}

/// Resolved id strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// 128 random bits from the seeded stream
    RandomUuid,
    /// Wall-clock seconds, a per-synthesizer random value and a counter
    SequentialObjectId,
    /// Uniform bucket plus a per-bucket sequence; unique within one synthesizer
    BoundedBusinessId {
        /// Number of buckets the prefix is drawn from
        buckets: u32,
    },
    /// Do not generate `_id`
    None,
}

impl IdStrategy {
    /// Build the strategy for a configured kind
    pub fn from_kind(kind: IdKind, buckets: Option<u32>) -> Self {
        match kind {
            IdKind::Uuid => IdStrategy::RandomUuid,
            IdKind::ObjectId => IdStrategy::SequentialObjectId,
            IdKind::BusinessId => IdStrategy::BoundedBusinessId {
                buckets: buckets.unwrap_or(DEFAULT_BUSINESS_ID_BUCKETS),
            },
            IdKind::None => IdStrategy::None,
        }
    }
}

pub(crate) enum IdGenerator {
    RandomUuid,
    ObjectId {
        process_unique: [u8; 5],
        counter: u32,
    },
    BusinessId {
        buckets: Uniform<u32>,
        sequences: HashMap<u32, u32>,
    },
    None,
}

impl IdGenerator {
    pub(crate) fn new(strategy: IdStrategy, rng: &mut StdRng) -> Self {
        match strategy {
            IdStrategy::RandomUuid => IdGenerator::RandomUuid,
            IdStrategy::SequentialObjectId => IdGenerator::ObjectId {
                process_unique: rng.gen(),
                counter: rng.gen_range(0..0x00ff_ffff),
            },
            IdStrategy::BoundedBusinessId { buckets } => IdGenerator::BusinessId {
                buckets: Uniform::new(0, buckets.max(1)),
                sequences: HashMap::new(),
            },
            IdStrategy::None => IdGenerator::None,
        }
    }

    pub(crate) fn next_id(&mut self, rng: &mut StdRng, worker: u64) -> Option<FieldValue> {
        match self {
            IdGenerator::RandomUuid => {
                let bytes: [u8; 16] = rng.gen();
                Some(FieldValue::Uuid(
                    uuid::Builder::from_random_bytes(bytes).into_uuid(),
                ))
            }
            IdGenerator::ObjectId {
                process_unique,
                counter,
            } => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs() as u32)
                    .unwrap_or(0);
                *counter = (*counter + 1) & 0x00ff_ffff;
                let mut oid = [0u8; 12];
                oid[..4].copy_from_slice(&secs.to_be_bytes());
                oid[4..9].copy_from_slice(process_unique);
                oid[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
                Some(FieldValue::ObjectId(oid))
            }
            IdGenerator::BusinessId { buckets, sequences } => {
                let bucket = buckets.sample(rng);
                let seq = sequences.entry(bucket).or_insert(0);
                let id = format!("ACC{bucket:05}_{:06x}{worker:03x}", *seq);
                *seq += 1;
                Some(FieldValue::String(id))
            }
            IdGenerator::None => None,
        }
    }
}
