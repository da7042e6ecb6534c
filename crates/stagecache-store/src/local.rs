//! Filesystem blob store
//!
//! Layout:
//! ```text
//! {root}/
//! └── {bucket}/
//!     └── {path}          # one encoded table per key
//! ```
//!
//! Writes go to a temp file in the target directory and are renamed into
//! place, so readers never observe a partially written entry.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use stagecache_core::{Codec, StoreError, Table};
use tempfile::NamedTempFile;

use crate::{BlobStore, CacheKey, decode_at, encode_for};

/// Blob store rooted at a local directory. The key's scheme is ignored.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    codec: Codec,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            codec: Codec::default(),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the entry for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let mut path = self.root.join(key.bucket());
        path.extend(key.path().split('/'));
        path
    }
}

fn unavailable(key: &CacheKey, path: &Path, e: io::Error) -> StoreError {
    StoreError::unavailable(key.as_str(), format!("{}: {e}", path.display()))
}

impl BlobStore for LocalStore {
    fn exists(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(unavailable(key, &path, e)),
        }
    }

    fn read(&self, key: &CacheKey) -> Result<Table, StoreError> {
        let path = self.path_for(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    uri: key.to_string(),
                });
            }
            Err(e) => return Err(unavailable(key, &path, e)),
        };
        decode_at(&self.codec, key, Bytes::from(data))
    }

    fn write(&self, key: &CacheKey, table: &Table) -> Result<(), StoreError> {
        let data = encode_for(&self.codec, key, table)?;
        let path = self.path_for(key);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| unavailable(key, dir, e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| unavailable(key, dir, e))?;
        tmp.write_all(&data)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| unavailable(key, tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| unavailable(key, &path, e.error))?;
        log::debug!("local store: wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}
