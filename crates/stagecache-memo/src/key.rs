//! Stage identity and cache key policies

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use stagecache_core::{Format, MemoError};
use stagecache_store::CacheKey;

use crate::hash;

/// Stable name of a transformation, independent of its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(Arc<str>);

impl StageId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StageId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

/// Arguments that select a partition, e.g. a processing date.
pub trait Partition {
    /// Path segment naming the partition.
    fn partition(&self) -> String;
}

impl Partition for str {
    fn partition(&self) -> String {
        self.to_string()
    }
}

impl Partition for String {
    fn partition(&self) -> String {
        self.clone()
    }
}

/// Dates partition as `YYYYMMDD`.
impl Partition for NaiveDate {
    fn partition(&self) -> String {
        self.format("%Y%m%d").to_string()
    }
}

impl<T: Partition + ?Sized> Partition for &T {
    fn partition(&self) -> String {
        (**self).partition()
    }
}

type DeriveFn<A> = dyn Fn(&A) -> Result<String, String> + Send + Sync;

/// How a stage call maps to its storage location.
///
/// Derivation is pure and runs before any store access; a URI that does not
/// parse as `scheme://bucket/path` fails the call with
/// [`MemoError::InvalidKey`] without touching the store.
pub enum KeyPolicy<A> {
    /// One entry for the stage regardless of arguments.
    Static(String),
    /// One entry per distinct argument value.
    Derived(Arc<DeriveFn<A>>),
}

impl<A> Clone for KeyPolicy<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(uri) => Self::Static(uri.clone()),
            Self::Derived(f) => Self::Derived(Arc::clone(f)),
        }
    }
}

impl<A> fmt::Debug for KeyPolicy<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(uri) => f.debug_tuple("Static").field(uri).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl<A> KeyPolicy<A> {
    pub fn fixed(uri: impl Into<String>) -> Self {
        Self::Static(uri.into())
    }

    pub fn derived<F>(f: F) -> Self
    where
        A: 'static,
        F: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self::Derived(Arc::new(move |args: &A| Ok(f(args))))
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }

    /// Compute and validate the key for one call.
    pub fn derive(&self, stage: &StageId, args: &A) -> Result<CacheKey, MemoError> {
        let uri = match self {
            Self::Static(uri) => uri.clone(),
            Self::Derived(f) => f(args).map_err(|reason| MemoError::InvalidKey {
                stage: stage.to_string(),
                key: String::new(),
                reason,
            })?,
        };
        CacheKey::parse(&uri).map_err(|e| MemoError::InvalidKey {
            stage: stage.to_string(),
            key: uri,
            reason: e.reason.to_string(),
        })
    }
}

impl<A: Partition + 'static> KeyPolicy<A> {
    /// `{prefix}/{partition}/{file_name}`, e.g. `s3://bucket/20240101/orders.csv`.
    pub fn partitioned(prefix: impl Into<String>, file_name: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        let file_name = file_name.into();
        Self::derived(move |args: &A| format!("{prefix}/{}/{file_name}", args.partition()))
    }
}

impl<A: Serialize + 'static> KeyPolicy<A> {
    /// `{prefix}/{stage}/{hash8}.{ext}` where `hash8` identifies the
    /// arguments' canonical JSON.
    pub fn hashed(prefix: impl Into<String>, stage: &StageId, format: Format) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        let stage = stage.clone();
        Self::Derived(Arc::new(move |args: &A| {
            let digest = hash::hash_json(args)
                .map_err(|e| format!("cannot serialize arguments: {e}"))?;
            Ok(format!(
                "{prefix}/{stage}/{}.{}",
                hash::short_hash(&digest),
                format.extension()
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> StageId {
        StageId::new("orders")
    }

    #[test]
    fn static_ignores_arguments() {
        let policy = KeyPolicy::<u32>::fixed("s3://bucket/orders.csv");
        assert!(policy.is_static());
        assert_eq!(
            policy.derive(&stage(), &1).unwrap(),
            policy.derive(&stage(), &2).unwrap()
        );
    }

    #[test]
    fn derived_is_deterministic() {
        let policy = KeyPolicy::derived(|date: &String| format!("store://data/{date}/A"));
        let a = policy.derive(&stage(), &"20240101".to_string()).unwrap();
        let b = policy.derive(&stage(), &"20240101".to_string()).unwrap();
        let c = policy.derive(&stage(), &"20240102".to_string()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "store://data/20240101/A");
    }

    #[test]
    fn partitioned_by_date() {
        let policy = KeyPolicy::partitioned("s3://mybucket/", "raw_orders.csv");
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let key = policy.derive(&stage(), &date).unwrap();
        assert_eq!(key.as_str(), "s3://mybucket/20240101/raw_orders.csv");
        assert_eq!(key.format(), Format::Csv);
    }

    #[test]
    fn partitioned_by_label() {
        let policy = KeyPolicy::<&'static str>::partitioned("store://data", "A.parquet");
        let key = policy.derive(&stage(), &"eu-west").unwrap();
        assert_eq!(key.as_str(), "store://data/eu-west/A.parquet");
        assert_eq!("eu-west".partition(), "eu-west");
    }

    #[test]
    fn hashed_keys() {
        #[derive(Serialize)]
        struct Args {
            region: &'static str,
            year: u16,
        }
        let id = StageId::new("sales");
        let policy = KeyPolicy::hashed("mem://cache", &id, Format::Parquet);
        let eu = policy
            .derive(&id, &Args {
                region: "eu",
                year: 2024,
            })
            .unwrap();
        let us = policy
            .derive(&id, &Args {
                region: "us",
                year: 2024,
            })
            .unwrap();
        assert_ne!(eu, us);
        assert!(eu.path().starts_with("sales/"));
        assert!(eu.path().ends_with(".parquet"));
        assert_eq!(eu.path().len(), "sales/".len() + 8 + ".parquet".len());
    }

    #[test]
    fn invalid_derived_uri() {
        let policy = KeyPolicy::derived(|name: &String| format!("data/{name}"));
        let err = policy.derive(&stage(), &"x".to_string()).unwrap_err();
        match err {
            MemoError::InvalidKey { stage, key, .. } => {
                assert_eq!(stage, "orders");
                assert_eq!(key, "data/x");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unserializable_arguments_are_invalid_keys() {
        let id = StageId::new("bad");
        let policy =
            KeyPolicy::<std::collections::BTreeMap<Vec<u8>, u8>>::hashed("mem://c", &id, Format::Csv);
        let mut args = std::collections::BTreeMap::new();
        args.insert(vec![1], 1);
        assert!(matches!(
            policy.derive(&id, &args),
            Err(MemoError::InvalidKey { .. })
        ));
    }

    #[test]
    fn stage_id_display() {
        assert_eq!(StageId::from("stg_orders").to_string(), "stg_orders");
        assert_eq!(StageId::from(String::from("a")).as_str(), "a");
    }
}
