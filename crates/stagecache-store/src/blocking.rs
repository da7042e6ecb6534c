//! Run a blocking store on tokio's blocking pool

use std::sync::Arc;

use futures_util::future::BoxFuture;
use stagecache_core::{StoreError, Table};

use crate::{AsyncBlobStore, BlobStore, CacheKey};

/// Presents a [`BlobStore`] as an [`AsyncBlobStore`].
///
/// Each operation runs via `tokio::task::spawn_blocking`, so filesystem or
/// other blocking I/O never stalls the async scheduler.
pub struct SpawnBlocking<S: ?Sized> {
    inner: Arc<S>,
}

impl<S: ?Sized> Clone for SpawnBlocking<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: BlobStore + 'static> SpawnBlocking<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }
}

impl<S: BlobStore + ?Sized + 'static> SpawnBlocking<S> {
    pub fn from_arc(store: Arc<S>) -> Self {
        Self { inner: store }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    async fn run<T, F>(&self, key: &CacheKey, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&S, &CacheKey) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.inner);
        let owned = key.clone();
        tokio::task::spawn_blocking(move || op(&*store, &owned))
            .await
            .map_err(|e| StoreError::unavailable(key.as_str(), format!("blocking task failed: {e}")))?
    }
}

impl<S: BlobStore + ?Sized + 'static> AsyncBlobStore for SpawnBlocking<S> {
    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(self.run(key, |store, key| store.exists(key)))
    }

    fn read<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Table, StoreError>> {
        Box::pin(self.run(key, |store, key| store.read(key)))
    }

    fn write<'a>(
        &'a self,
        key: &'a CacheKey,
        table: &'a Table,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let table = table.clone();
        Box::pin(self.run(key, move |store, key| store.write(key, &table)))
    }
}
