//! Async memoizer with per-key coalescing of concurrent calls

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use stagecache_core::{MemoError, Table};
use stagecache_store::{AsyncBlobStore, CacheKey};

use crate::key::{KeyPolicy, StageId};
use crate::memoizer::{Lookup, MemoizerOptions, StageStatus, as_stored, classify_read};
use crate::registry::{Claim, InFlightRegistry, MemoResult};
use crate::stats::{MemoStats, StatsSnapshot};

type StageFuture = BoxFuture<'static, anyhow::Result<Table>>;
type AsyncStageFn<A> = dyn Fn(A) -> StageFuture + Send + Sync;

/// Async counterpart of [`Memoizer`](crate::Memoizer).
///
/// All stages created from one memoizer share its store, options, stats and
/// in-flight registry. Concurrent calls that derive the same key, from any
/// of those stages, share one read-compute-write sequence.
pub struct AsyncMemoizer<S: ?Sized = dyn AsyncBlobStore> {
    store: Arc<S>,
    registry: Arc<InFlightRegistry>,
    options: MemoizerOptions,
    stats: Arc<MemoStats>,
}

impl<S: AsyncBlobStore + ?Sized + 'static> AsyncMemoizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            registry: InFlightRegistry::shared(),
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

    pub fn registry(&self) -> &Arc<InFlightRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wrap an async stage function under `id`.
    pub fn memoize<A, F, Fut>(
        &self,
        id: impl Into<StageId>,
        policy: KeyPolicy<A>,
        stage_fn: F,
    ) -> AsyncMemoizedStage<A, S>
    where
        A: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Table>> + Send + 'static,
    {
        let stage_fn: Box<AsyncStageFn<A>> = Box::new(move |args: A| stage_fn(args).boxed());
        AsyncMemoizedStage {
            inner: Arc::new(StageInner {
                id: id.into(),
                policy,
                stage_fn,
                store: Arc::clone(&self.store),
                registry: Arc::clone(&self.registry),
                options: self.options,
                stats: Arc::clone(&self.stats),
            }),
        }
    }
}

struct StageInner<A, S: ?Sized> {
    id: StageId,
    policy: KeyPolicy<A>,
    stage_fn: Box<AsyncStageFn<A>>,
    store: Arc<S>,
    registry: Arc<InFlightRegistry>,
    options: MemoizerOptions,
    stats: Arc<MemoStats>,
}

impl<A, S: AsyncBlobStore + ?Sized> StageInner<A, S> {
    async fn resolve(&self, key: CacheKey, args: A) -> MemoResult {
        if self.options.force {
            self.stats.record_miss();
            log::info!("{}: forced refresh of {key}", self.id);
        } else {
            let read = self.store.read(&key).await;
            if let Lookup::Hit(table) = classify_read(&self.id, &key, read, &self.stats)? {
                return Ok(table);
            }
        }

        let table = match (self.stage_fn)(args).await {
            Ok(table) => table,
            Err(e) => {
                self.stats.record_failure();
                let err = MemoError::from_stage(self.id.as_str(), e);
                log::error!("{}: {err}", self.id);
                return Err(err);
            }
        };
        let table = as_stored(&self.id, &key, table, &self.stats)?;

        if let Err(e) = self.store.write(&key, &table).await {
            self.stats.record_failure();
            log::error!("{}: cannot store result: {e}", self.id);
            return Err(e.into());
        }
        log::info!("{}: wrote {} rows to {key}", self.id, table.num_rows());
        Ok(table)
    }
}

/// An async stage function bound to its key policy, store and registry.
///
/// Cheap to clone; clones share everything.
pub struct AsyncMemoizedStage<A, S: ?Sized = dyn AsyncBlobStore> {
    inner: Arc<StageInner<A, S>>,
}

impl<A, S: ?Sized> Clone for AsyncMemoizedStage<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, S> AsyncMemoizedStage<A, S>
where
    A: Send + 'static,
    S: AsyncBlobStore + ?Sized + 'static,
{
    pub fn id(&self) -> &StageId {
        &self.inner.id
    }

    pub fn key(&self, args: &A) -> Result<CacheKey, MemoError> {
        self.inner.policy.derive(&self.inner.id, args)
    }

    /// Return the stored result for `args`, computing it on a miss.
    ///
    /// The key is derived before anything is awaited. If a call for the
    /// same key is already in flight this one joins it and gets the same
    /// result. Dropping the returned future abandons only this caller; the
    /// computation is cancelled once no caller is left.
    pub fn call(&self, args: A) -> BoxFuture<'static, MemoResult> {
        let key = match self.key(&args) {
            Ok(key) => key,
            Err(e) => return future::ready(Err(e)).boxed(),
        };

        let inner = Arc::clone(&self.inner);
        let owned = key.clone();
        let (shared, claim) = self.inner.registry.claim_or_join(&key, move |guard| {
            async move {
                let _guard = guard;
                inner.resolve(owned, args).await
            }
            .boxed()
        });
        if claim == Claim::Joined {
            self.inner.stats.record_coalesced();
            log::debug!("{}: joined in-flight computation", self.inner.id);
        }
        shared.boxed()
    }

    /// Run `call(args)` as its own tokio task.
    ///
    /// The task keeps going even if the returned future is dropped, so
    /// sibling dependencies still populate the store when one of them
    /// fails. Must be called from within a tokio runtime.
    pub fn spawn(&self, args: A) -> BoxFuture<'static, MemoResult> {
        let handle = tokio::spawn(self.call(args));
        async move { handle.await.unwrap_or_else(|e| Err(crate::gather::join_error(e))) }.boxed()
    }

    /// Whether `call(args)` would be answered from the store.
    pub async fn status(&self, args: &A) -> Result<StageStatus, MemoError> {
        let key = self.key(args)?;
        if self.inner.options.force {
            return Ok(StageStatus::NeedsRun);
        }
        Ok(if self.inner.store.exists(&key).await? {
            StageStatus::Cached
        } else {
            StageStatus::NeedsRun
        })
    }
}
