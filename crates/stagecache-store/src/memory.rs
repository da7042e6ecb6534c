//! In-process blob store keeping encoded bytes in a map

use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use stagecache_core::{Codec, StoreError, Table};

use crate::{AsyncBlobStore, BlobStore, CacheKey, decode_at, encode_for};

/// Blob store backed by a map from URI to encoded bytes.
///
/// Tables are encoded on write and decoded on read exactly like a remote
/// store, so a stored value never aliases the caller's table and corrupt
/// bytes are reported as such.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<FxHashMap<String, Bytes>>,
    codec: Codec,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec(codec: Codec) -> Self {
        Self {
            objects: Mutex::default(),
            codec,
        }
    }

    /// Store raw bytes at `key`, bypassing the encoder.
    pub fn put_raw(&self, key: &CacheKey, data: impl Into<Bytes>) {
        self.lock().insert(key.to_string(), data.into());
    }

    /// Raw bytes stored at `key`.
    pub fn get_raw(&self, key: &CacheKey) -> Option<Bytes> {
        self.lock().get(key.as_str()).cloned()
    }

    /// All stored URIs, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, Bytes>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BlobStore for MemoryStore {
    fn exists(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self.lock().contains_key(key.as_str()))
    }

    fn read(&self, key: &CacheKey) -> Result<Table, StoreError> {
        let data = self.get_raw(key).ok_or_else(|| StoreError::NotFound {
            uri: key.to_string(),
        })?;
        decode_at(&self.codec, key, data)
    }

    fn write(&self, key: &CacheKey, table: &Table) -> Result<(), StoreError> {
        let data = encode_for(&self.codec, key, table)?;
        self.put_raw(key, data);
        Ok(())
    }
}

impl AsyncBlobStore for MemoryStore {
    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { BlobStore::exists(self, key) })
    }

    fn read<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Table, StoreError>> {
        Box::pin(async move { BlobStore::read(self, key) })
    }

    fn write<'a>(
        &'a self,
        key: &'a CacheKey,
        table: &'a Table,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move { BlobStore::write(self, key, table) })
    }
}
