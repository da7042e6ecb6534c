//! Store wrappers for exercising failure paths in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use stagecache_core::{StoreError, Table};

use crate::{AsyncBlobStore, BlobStore, CacheKey};

/// Wraps a store, counting calls and optionally failing or slowing them.
///
/// Injected errors persist until cleared. The async impl sleeps for the
/// configured delay before touching the inner store, which makes races
/// between concurrent callers reproducible.
#[derive(Debug, Default)]
pub struct FaultyStore<S> {
    inner: S,
    read_error: Mutex<Option<StoreError>>,
    write_error: Mutex<Option<StoreError>>,
    delay: Option<Duration>,
    exists_calls: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            read_error: Mutex::new(None),
            write_error: Mutex::new(None),
            delay: None,
            exists_calls: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail every read (and exists check) with `err`; `None` clears it.
    pub fn fail_reads(&self, err: Option<StoreError>) {
        *self.read_error.lock().unwrap_or_else(PoisonError::into_inner) = err;
    }

    /// Fail every write with `err`; `None` clears it.
    pub fn fail_writes(&self, err: Option<StoreError>) {
        *self.write_error.lock().unwrap_or_else(PoisonError::into_inner) = err;
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn injected_read(&self) -> Option<StoreError> {
        self.read_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn injected_write(&self) -> Option<StoreError> {
        self.write_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<S: BlobStore> BlobStore for FaultyStore<S> {
    fn exists(&self, key: &CacheKey) -> Result<bool, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        match self.injected_read() {
            Some(e) => Err(e),
            None => self.inner.exists(key),
        }
    }

    fn read(&self, key: &CacheKey) -> Result<Table, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.injected_read() {
            Some(e) => Err(e),
            None => self.inner.read(key),
        }
    }

    fn write(&self, key: &CacheKey, table: &Table) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.injected_write() {
            Some(e) => Err(e),
            None => self.inner.write(key, table),
        }
    }
}

impl<S: AsyncBlobStore> FaultyStore<S> {
    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl<S: AsyncBlobStore> AsyncBlobStore for FaultyStore<S> {
    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            self.exists_calls.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            match self.injected_read() {
                Some(e) => Err(e),
                None => self.inner.exists(key).await,
            }
        })
    }

    fn read<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Table, StoreError>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            match self.injected_read() {
                Some(e) => Err(e),
                None => self.inner.read(key).await,
            }
        })
    }

    fn write<'a>(
        &'a self,
        key: &'a CacheKey,
        table: &'a Table,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            match self.injected_write() {
                Some(e) => Err(e),
                None => self.inner.write(key, table).await,
            }
        })
    }
}
