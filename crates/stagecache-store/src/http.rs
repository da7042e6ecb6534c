//! S3-compatible HTTP blob store.
//!
//! Objects are addressed path-style: `s3://bucket/a/b.csv` lives at
//! `{endpoint}/bucket/a/b.csv`. `HEAD` answers `exists`, `GET` reads and
//! `PUT` writes. Requests are unsigned; credentials belong to whatever sits
//! in front of the endpoint.

use std::sync::LazyLock;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use stagecache_core::{Codec, StoreError, Table};

use crate::{AsyncBlobStore, BlobStore, CacheKey, decode_at, encode_for};

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default whole-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Runtime backing the blocking [`BlobStore`] impl.
static BLOCKING_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Blob store talking to an S3-compatible HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    endpoint: String,
    codec: Codec,
}

impl HttpStore {
    /// Build a store with its own connection pool.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .pool_max_idle_per_host(8)
            .build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            codec: Codec::default(),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Path-style object URL for `key`.
    pub fn object_url(&self, key: &CacheKey) -> String {
        format!("{}/{}/{}", self.endpoint, key.bucket(), key.path())
    }

    async fn exists_async(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let response = self
            .client
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| transport_error(key, &e))?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(key, s)),
        }
    }

    async fn read_async(&self, key: &CacheKey) -> Result<Table, StoreError> {
        let response = self
            .client
            .get(self.object_url(key))
            .send()
            .await
            .map_err(|e| transport_error(key, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(key, status));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(key, &e))?;
        log::debug!("http store: GET {} ({} bytes)", key, body.len());
        decode_at(&self.codec, key, body)
    }

    async fn write_async(&self, key: &CacheKey, table: &Table) -> Result<(), StoreError> {
        let body = encode_for(&self.codec, key, table)?;
        let len = body.len();
        let response = self
            .client
            .put(self.object_url(key))
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(key, &e))?;
        let status = response.status();
        if !status.is_success() {
            // A 404 on PUT means the bucket is missing, which is not a cache miss.
            return Err(StoreError::unavailable(key.as_str(), format!("HTTP {status}")));
        }
        log::debug!("http store: PUT {key} ({len} bytes)");
        Ok(())
    }
}

fn transport_error(key: &CacheKey, e: &reqwest::Error) -> StoreError {
    match e.status() {
        Some(s) => StoreError::unavailable(key.as_str(), format!("HTTP {}: {e}", s.as_u16())),
        None => StoreError::unavailable(key.as_str(), e),
    }
}

/// Map a non-success response status. Only 404 is a miss.
pub fn status_error(key: &CacheKey, status: StatusCode) -> StoreError {
    if status == StatusCode::NOT_FOUND {
        StoreError::NotFound {
            uri: key.to_string(),
        }
    } else {
        StoreError::unavailable(key.as_str(), format!("HTTP {status}"))
    }
}

impl AsyncBlobStore for HttpStore {
    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(self.exists_async(key))
    }

    fn read<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Table, StoreError>> {
        Box::pin(self.read_async(key))
    }

    fn write<'a>(
        &'a self,
        key: &'a CacheKey,
        table: &'a Table,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.write_async(key, table))
    }
}

/// Blocking access for sync pipelines. Must not be called from inside an
/// async runtime.
impl BlobStore for HttpStore {
    fn exists(&self, key: &CacheKey) -> Result<bool, StoreError> {
        BLOCKING_RUNTIME.handle().block_on(self.exists_async(key))
    }

    fn read(&self, key: &CacheKey) -> Result<Table, StoreError> {
        BLOCKING_RUNTIME.handle().block_on(self.read_async(key))
    }

    fn write(&self, key: &CacheKey, table: &Table) -> Result<(), StoreError> {
        BLOCKING_RUNTIME.handle().block_on(self.write_async(key, table))
    }
}
