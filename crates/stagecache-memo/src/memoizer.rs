//! Blocking memoizer: read the store, compute on a miss, write the result

use std::fmt;
use std::sync::Arc;

use stagecache_core::{Codec, MemoError, StoreError, Table};
use stagecache_store::{BlobStore, CacheKey};

use crate::key::{KeyPolicy, StageId};
use crate::stats::{MemoStats, StatsSnapshot};

/// Behaviour shared by every stage of a memoizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoizerOptions {
    /// Skip the store read and always recompute and rewrite.
    pub force: bool,
}

/// Whether a call would be served from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Cached,
    NeedsRun,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => write!(f, "CACHED"),
            Self::NeedsRun => write!(f, "NEEDS_RUN"),
        }
    }
}

/// Outcome of the store lookup that precedes a computation.
pub(crate) enum Lookup {
    Hit(Table),
    Miss,
}

/// Classify a read result. Only `NotFound` is a miss.
pub(crate) fn classify_read(
    stage: &StageId,
    key: &CacheKey,
    result: Result<Table, StoreError>,
    stats: &MemoStats,
) -> Result<Lookup, MemoError> {
    match result {
        Ok(table) => {
            stats.record_hit();
            log::info!("{stage}: cache hit at {key} ({} rows)", table.num_rows());
            Ok(Lookup::Hit(table))
        }
        Err(StoreError::NotFound { .. }) => {
            stats.record_miss();
            log::info!("{stage}: cache miss at {key}, computing");
            Ok(Lookup::Miss)
        }
        Err(e) => {
            stats.record_failure();
            log::warn!("{stage}: store read failed, not recomputing: {e}");
            Err(e.into())
        }
    }
}

/// The table a later read of `key` returns for a freshly computed `table`.
///
/// A miss hands back this form so hits and misses agree; only CSV keys
/// change anything.
pub(crate) fn as_stored(
    stage: &StageId,
    key: &CacheKey,
    table: Table,
    stats: &MemoStats,
) -> Result<Table, MemoError> {
    Codec::default()
        .normalize(table, key.format())
        .map_err(|e| {
            stats.record_failure();
            log::error!("{stage}: cannot encode result for {key}: {e}");
            MemoError::Store(StoreError::Encode {
                uri: key.to_string(),
                message: e.to_string(),
            })
        })
}

/// Wraps blocking stage functions so each result is computed at most once
/// per cache key and then served from `store`.
pub struct Memoizer<S: ?Sized = dyn BlobStore> {
    store: Arc<S>,
    options: MemoizerOptions,
    stats: Arc<MemoStats>,
}

impl<S: BlobStore + ?Sized> Memoizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            options: MemoizerOptions::default(),
            stats: Arc::default(),
        }
    }

    pub fn with_options(mut self, options: MemoizerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> MemoizerOptions {
        self.options
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wrap `stage_fn` under `id`, storing results where `policy` says.
    pub fn memoize<A, F>(
        &self,
        id: impl Into<StageId>,
        policy: KeyPolicy<A>,
        stage_fn: F,
    ) -> MemoizedStage<A, S>
    where
        F: Fn(&A) -> anyhow::Result<Table> + Send + Sync + 'static,
    {
        MemoizedStage {
            id: id.into(),
            policy,
            stage_fn: Box::new(stage_fn),
            store: Arc::clone(&self.store),
            options: self.options,
            stats: Arc::clone(&self.stats),
        }
    }
}

type StageFn<A> = dyn Fn(&A) -> anyhow::Result<Table> + Send + Sync;

/// A stage function bound to its key policy and store.
pub struct MemoizedStage<A, S: ?Sized = dyn BlobStore> {
    id: StageId,
    policy: KeyPolicy<A>,
    stage_fn: Box<StageFn<A>>,
    store: Arc<S>,
    options: MemoizerOptions,
    stats: Arc<MemoStats>,
}

impl<A, S: BlobStore + ?Sized> MemoizedStage<A, S> {
    pub fn id(&self) -> &StageId {
        &self.id
    }

    /// Cache key for `args`, without touching the store.
    pub fn key(&self, args: &A) -> Result<CacheKey, MemoError> {
        self.policy.derive(&self.id, args)
    }

    /// Return the stored result for `args`, computing and storing it first
    /// if the store has none.
    ///
    /// Store failures other than absence are returned as-is; the stage
    /// function is not run. A failed computation writes nothing.
    pub fn call(&self, args: &A) -> Result<Table, MemoError> {
        let key = self.key(args)?;
        if self.options.force {
            self.stats.record_miss();
            log::info!("{}: forced refresh of {key}", self.id);
        } else {
            let read = self.store.read(&key);
            if let Lookup::Hit(table) = classify_read(&self.id, &key, read, &self.stats)? {
                return Ok(table);
            }
        }

        let table = (self.stage_fn)(args).map_err(|e| {
            self.stats.record_failure();
            let err = MemoError::from_stage(self.id.as_str(), e);
            log::error!("{}: {err}", self.id);
            err
        })?;
        let table = as_stored(&self.id, &key, table, &self.stats)?;

        self.store.write(&key, &table).map_err(|e| {
            self.stats.record_failure();
            log::error!("{}: cannot store result: {e}", self.id);
            MemoError::from(e)
        })?;
        log::info!("{}: wrote {} rows to {key}", self.id, table.num_rows());
        Ok(table)
    }

    /// Whether `call(args)` would be answered from the store.
    pub fn status(&self, args: &A) -> Result<StageStatus, MemoError> {
        let key = self.key(args)?;
        if self.options.force {
            return Ok(StageStatus::NeedsRun);
        }
        Ok(if self.store.exists(&key)? {
            StageStatus::Cached
        } else {
            StageStatus::NeedsRun
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use arrow::array::{Array, ArrayRef, Int32Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use stagecache_core::table_from_columns;
    use stagecache_store::MemoryStore;
    use stagecache_store::test_util::FaultyStore;

    fn numbers(values: Vec<i64>) -> Table {
        table_from_columns(vec![("n", Arc::new(Int64Array::from(values)) as ArrayRef)]).unwrap()
    }

    fn by_date() -> KeyPolicy<String> {
        KeyPolicy::derived(|date: &String| format!("store://data/{date}/A"))
    }

    /// Stage returning `[len(date)]` and counting its invocations.
    fn counting(
        memo: &Memoizer<FaultyStore<MemoryStore>>,
        calls: &Arc<AtomicUsize>,
    ) -> MemoizedStage<String, FaultyStore<MemoryStore>> {
        let calls = Arc::clone(calls);
        memo.memoize("A", by_date(), move |date: &String| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(numbers(vec![date.len() as i64]))
        })
    }

    #[test]
    fn second_call_is_a_hit() {
        let memo = Memoizer::new(Arc::new(FaultyStore::new(MemoryStore::new())));
        let calls = Arc::new(AtomicUsize::new(0));
        let stage = counting(&memo, &calls);
        let date = "20240101".to_string();

        let first = stage.call(&date).unwrap();
        let second = stage.call(&date).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.store().writes(), 1);
        assert_eq!(memo.stats().hits, 1);
        assert_eq!(memo.stats().misses, 1);
    }

    #[test]
    fn miss_populates_store() {
        let memo = Memoizer::new(Arc::new(FaultyStore::new(MemoryStore::new())));
        let calls = Arc::new(AtomicUsize::new(0));
        let stage = counting(&memo, &calls);
        let date = "20240101".to_string();
        let key = stage.key(&date).unwrap();

        assert_eq!(stage.status(&date).unwrap(), StageStatus::NeedsRun);
        let value = stage.call(&date).unwrap();
        assert!(memo.store().inner().exists(&key).unwrap());
        assert_eq!(memo.store().inner().read(&key).unwrap(), value);
        assert_eq!(stage.status(&date).unwrap(), StageStatus::Cached);
    }

    #[test]
    fn csv_miss_returns_what_a_hit_reads() {
        let memo = Memoizer::new(Arc::new(MemoryStore::new()));
        let stage = memo.memoize(
            "zips",
            KeyPolicy::derived(|date: &String| format!("s3://b/{date}/zips.csv")),
            |_: &String| {
                Ok(table_from_columns(vec![
                    ("zip", Arc::new(StringArray::from(vec!["01234", "00007"])) as ArrayRef),
                    ("n", Arc::new(Int32Array::from(vec![1, 7])) as ArrayRef),
                ])?)
            },
        );
        let date = "20240101".to_string();

        let miss = stage.call(&date).unwrap();
        let hit = stage.call(&date).unwrap();
        assert_eq!(memo.stats().hits, 1);
        assert_eq!(miss, hit);
        assert_eq!(miss.column_by_name("n").unwrap().data_type(), &DataType::Int64);
    }

    #[test]
    fn empty_csv_result_keeps_its_columns() {
        let memo = Memoizer::new(Arc::new(MemoryStore::new()));
        let schema = Arc::new(Schema::new(vec![Field::new("order_id", DataType::Int64, true)]));
        let stage = memo.memoize("empty", KeyPolicy::fixed("s3://b/E.csv"), move |_: &()| {
            Ok(Table::empty(Arc::clone(&schema)))
        });

        let miss = stage.call(&()).unwrap();
        let hit = stage.call(&()).unwrap();
        assert_eq!(memo.stats().hits, 1);
        assert_eq!(hit.column_names(), vec!["order_id"]);
        assert_eq!(miss, hit);
    }

    #[test]
    fn distinct_arguments_compute_separately() {
        let memo = Memoizer::new(Arc::new(FaultyStore::new(MemoryStore::new())));
        let calls = Arc::new(AtomicUsize::new(0));
        let stage = counting(&memo, &calls);
        stage.call(&"20240101".to_string()).unwrap();
        stage.call(&"20240102".to_string()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.store().inner().len(), 2);
    }

    #[test]
    fn failure_is_not_cached() {
        let memo = Memoizer::new(Arc::new(MemoryStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let stage = memo.memoize("flaky", by_date(), move |_date: &String| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                bail!("upstream API returned 502");
            }
            Ok(numbers(vec![1]))
        });
        let date = "20240101".to_string();

        let err = stage.call(&date).unwrap_err();
        assert_eq!(err.failed_stage(), Some("flaky"));
        assert!(err.to_string().contains("502"));
        assert!(memo.store().is_empty());

        assert_eq!(stage.call(&date).unwrap(), numbers(vec![1]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.stats().failures, 1);
    }

    #[test]
    fn store_errors_propagate_without_computing() {
        for injected in [
            StoreError::unavailable("store://data/20240101/A", "connection reset"),
            StoreError::Corrupt {
                uri: "store://data/20240101/A".into(),
                message: "bad magic".into(),
            },
        ] {
            let memo = Memoizer::new(Arc::new(FaultyStore::new(MemoryStore::new())));
            memo.store().fail_reads(Some(injected.clone()));
            let calls = Arc::new(AtomicUsize::new(0));
            let stage = counting(&memo, &calls);

            let err = stage.call(&"20240101".to_string()).unwrap_err();
            assert_eq!(err.store_error(), Some(&injected));
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            assert_eq!(memo.store().writes(), 0);
        }
    }

    #[test]
    fn write_failure_propagates() {
        let memo = Memoizer::new(Arc::new(FaultyStore::new(MemoryStore::new())));
        memo.store()
            .fail_writes(Some(StoreError::unavailable("store://data/x/A", "403")));
        let calls = Arc::new(AtomicUsize::new(0));
        let stage = counting(&memo, &calls);
        assert!(matches!(
            stage.call(&"x".to_string()),
            Err(MemoError::Store(StoreError::Unavailable { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn force_recomputes_and_rewrites() {
        let store = Arc::new(FaultyStore::new(MemoryStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let date = "20240101".to_string();

        let memo = Memoizer::new(Arc::clone(&store));
        counting(&memo, &calls).call(&date).unwrap();

        let forced = Memoizer::new(Arc::clone(&store)).with_options(MemoizerOptions { force: true });
        let stage = counting(&forced, &calls);
        assert_eq!(stage.status(&date).unwrap(), StageStatus::NeedsRun);
        stage.call(&date).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.reads(), 1);
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn invalid_key_fails_before_io() {
        let memo = Memoizer::new(Arc::new(FaultyStore::new(MemoryStore::new())));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let stage = memo.memoize(
            "bad",
            KeyPolicy::derived(|date: &String| format!("no-scheme/{date}")),
            move |_: &String| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(numbers(vec![]))
            },
        );
        assert!(matches!(
            stage.call(&"d".to_string()),
            Err(MemoError::InvalidKey { .. })
        ));
        assert_eq!(memo.store().reads(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn upstream_failure_surfaces_unchanged() {
        let memo = Memoizer::new(Arc::new(MemoryStore::new()));
        let upstream = Arc::new(memo.memoize("A", by_date(), |_: &String| -> anyhow::Result<Table> {
            bail!("source offline")
        }));
        let up = Arc::clone(&upstream);
        let downstream = memo.memoize(
            "B",
            KeyPolicy::derived(|date: &String| format!("store://data/{date}/B")),
            move |date: &String| Ok(up.call(date)?),
        );

        let err = downstream.call(&"20240101".to_string()).unwrap_err();
        assert_eq!(err.failed_stage(), Some("A"));
        assert!(memo.store().is_empty());
    }
}
