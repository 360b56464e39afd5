//! Seed-data generation shared by the workloads

use indicatif::{ProgressBar, ProgressStyle};

use unibench_core::{FieldValue, Namespace, Record, RecordStore, WorkloadError};

/// Synthesizer seed for seed data, kept clear of worker seeds
pub const GENERATOR_SEED: u64 = 0xfff;

/// Integer id, 32-bit when it fits
pub fn numeric_id(n: u64) -> FieldValue {
    match i32::try_from(n) {
        Ok(small) => FieldValue::Int32(small),
        Err(_) => FieldValue::Int64(n as i64),
    }
}

/// What [`seed_collection`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The collection already held the target count; nothing was written
    Skipped {
        /// Records found
        existing: u64,
    },
    /// The collection was dropped and rewritten
    Written {
        /// Records inserted
        records: u64,
        /// Batches the store rejected
        failed_batches: u64,
    },
}

impl SeedOutcome {
    /// Records written by this call
    pub fn written(&self) -> u64 {
        match self {
            SeedOutcome::Skipped { .. } => 0,
            SeedOutcome::Written { records, .. } => *records,
        }
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Fill `ns` with `count` records built by `make(n)` for `n` in `0..count`
///
/// Skips all work when the estimated count already equals `count`. Otherwise
/// the collection is dropped and rewritten in `batch_size` batches; a
/// rejected batch is logged and generation continues.
pub async fn seed_collection<F>(
    store: &dyn RecordStore,
    ns: &Namespace,
    count: u64,
    batch_size: usize,
    mut make: F,
) -> Result<SeedOutcome, WorkloadError>
where
    F: FnMut(u64) -> Record + Send,
{
    let existing = store.estimated_count(ns).await?;
    if existing == count {
        tracing::info!(namespace = %ns, count, "Collection already populated, not regenerating");
        return Ok(SeedOutcome::Skipped { existing });
    }
    if count == 0 {
        return Ok(SeedOutcome::Skipped { existing });
    }

    tracing::info!(namespace = %ns, count, existing, "Generating seed data");
    store.drop_collection(ns).await?;

    let batch_size = batch_size.max(1);
    let pb = progress_bar(count);
    let mut batch = Vec::with_capacity(batch_size);
    let mut records = 0u64;
    let mut failed_batches = 0u64;

    for n in 0..count {
        batch.push(make(n));
        if batch.len() >= batch_size || n + 1 == count {
            let size = batch.len() as u64;
            match store.insert_many(ns, std::mem::take(&mut batch)).await {
                Ok(inserted) => records += inserted as u64,
                Err(e) => {
                    failed_batches += 1;
                    tracing::error!(namespace = %ns, error = %e, "Error inserting seed batch");
                }
            }
            pb.inc(size);
        }
    }
    pb.finish_and_clear();

    tracing::info!(namespace = %ns, records, failed_batches, "Seed data generated");
    Ok(SeedOutcome::Written {
        records,
        failed_batches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibench_core::{Filter, FindOptions};
    use unibench_storage::MemoryStore;

    fn ns() -> Namespace {
        Namespace::new("bench", "seed")
    }

    #[tokio::test]
    async fn test_seed_writes_then_skips() {
        let store = MemoryStore::new();
        let make = |n: u64| Record::new().with("_id", n as i64);

        let first = seed_collection(&store, &ns(), 25, 10, make).await.unwrap();
        assert_eq!(first, SeedOutcome::Written { records: 25, failed_batches: 0 });

        let second = seed_collection(&store, &ns(), 25, 10, make).await.unwrap();
        assert_eq!(second, SeedOutcome::Skipped { existing: 25 });
        assert_eq!(second.written(), 0);
    }

    #[tokio::test]
    async fn test_seed_rewrites_on_count_mismatch() {
        let store = MemoryStore::new();
        store
            .insert_one(&ns(), Record::new().with("_id", "stale"))
            .await
            .unwrap();

        let outcome = seed_collection(&store, &ns(), 3, 2, |n| Record::new().with("_id", n as i64))
            .await
            .unwrap();

        assert_eq!(outcome.written(), 3);
        let stale = store
            .find(&ns(), &Filter::eq("_id", "stale"), &FindOptions::default())
            .await
            .unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_seed_counts_rejected_batches() {
        let store = MemoryStore::new();
        // Every record collides after the first.
        let outcome = seed_collection(&store, &ns(), 4, 2, |_| Record::new().with("_id", 1i32))
            .await
            .unwrap();

        match outcome {
            SeedOutcome::Written { failed_batches, .. } => assert_eq!(failed_batches, 2),
            other => panic!("expected a rewrite, got {other:?}"),
        }
        assert_eq!(store.estimated_count(&ns()).await.unwrap(), 1);
    }
}
