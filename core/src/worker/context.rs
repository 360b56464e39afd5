//! Per-worker execution context

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::RunConfig;
use crate::synth::{DocumentSynthesizer, IdKind};

/// Which pass a worker belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Unmeasured pass; results discarded
    Warmup,
    /// Measured pass
    Measured,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Warmup => f.write_str("warmup"),
            Phase::Measured => f.write_str("measured"),
        }
    }
}

/// State owned by exactly one worker for one pass
///
/// The seed, and therefore every random draw, depends only on the worker
/// index.
#[derive(Debug)]
pub struct WorkerContext {
    /// Worker index in `0..count`
    pub index: usize,
    /// Workers in the pass
    pub count: usize,
    /// Resolved configuration, shared read-only
    pub config: Arc<RunConfig>,
    /// Pass this worker runs in
    pub phase: Phase,
    /// Worker-owned random stream
    pub rng: StdRng,
}

impl WorkerContext {
    /// Create the context for worker `index` of `count`
    pub fn new(index: usize, count: usize, config: Arc<RunConfig>, phase: Phase) -> Self {
        Self {
            index,
            count: count.max(1),
            config,
            phase,
            rng: StdRng::seed_from_u64(index as u64),
        }
    }

    /// Deterministic seed
    pub fn seed(&self) -> u64 {
        self.index as u64
    }

    /// This worker's share of `total`; the remainder is dropped
    pub fn share(&self, total: u64) -> u64 {
        total / self.count as u64
    }

    /// Synthesizer seeded like this worker, sized from the configuration
    pub fn synthesizer(&self, default_id: IdKind) -> DocumentSynthesizer {
        DocumentSynthesizer::new(
            self.seed(),
            self.config.id_strategy(default_id),
            self.config.doc_size_bytes(),
            Some(self.config.max_fields_per_object()),
        )
    }
}
