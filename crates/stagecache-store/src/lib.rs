//! stagecache-store: blob store adapters for memoized stage outputs
//!
//! A blob store maps [`CacheKey`] URIs to serialized tables. It exposes
//! exactly three operations (exists, read, write) and knows nothing about
//! caching. Adapters:
//!
//! - [`MemoryStore`]: process-local map, for tests and dry runs
//! - [`LocalStore`]: `{root}/{bucket}/{path}` on the local filesystem
//! - [`HttpStore`]: S3-compatible HTTP endpoint, path-style addressing
//! - [`SpawnBlocking`]: any sync store presented as an async one

pub mod blocking;
pub mod http;
pub mod key;
pub mod local;
pub mod memory;
pub mod test_util;

pub use blocking::SpawnBlocking;
pub use http::HttpStore;
pub use key::{CacheKey, KeyError};
pub use local::LocalStore;
pub use memory::MemoryStore;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use stagecache_core::{Codec, StoreError, Table};

/// Blocking blob store.
///
/// - `exists` returns `Ok(false)` for a missing object, never `NotFound`.
/// - `read` fails with `NotFound`, `Unavailable` or `Corrupt`.
/// - `write` fully replaces any existing object; a successful write is
///   visible to every later `read`/`exists`.
pub trait BlobStore: Send + Sync {
    fn exists(&self, key: &CacheKey) -> Result<bool, StoreError>;
    fn read(&self, key: &CacheKey) -> Result<Table, StoreError>;
    fn write(&self, key: &CacheKey, table: &Table) -> Result<(), StoreError>;
}

/// Non-blocking blob store with the same contract as [`BlobStore`].
pub trait AsyncBlobStore: Send + Sync {
    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool, StoreError>>;
    fn read<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Table, StoreError>>;
    fn write<'a>(&'a self, key: &'a CacheKey, table: &'a Table)
    -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Decode stored bytes, mapping codec failures to `Corrupt`.
pub(crate) fn decode_at(codec: &Codec, key: &CacheKey, data: Bytes) -> Result<Table, StoreError> {
    codec
        .decode(data, key.format())
        .map_err(|e| StoreError::Corrupt {
            uri: key.to_string(),
            message: e.to_string(),
        })
}

/// Encode a table for `key`, mapping codec failures to `Encode`.
pub(crate) fn encode_for(codec: &Codec, key: &CacheKey, table: &Table) -> Result<Vec<u8>, StoreError> {
    codec
        .encode(table, key.format())
        .map_err(|e| StoreError::Encode {
            uri: key.to_string(),
            message: e.to_string(),
        })
}
