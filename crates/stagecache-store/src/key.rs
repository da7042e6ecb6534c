//! Cache keys: `scheme://bucket/path` URIs naming one stored table

use std::fmt;

use stagecache_core::Format;

/// Why a string is not a valid cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyError {
    pub key: String,
    pub reason: &'static str,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cache key {:?}: {}", self.key, self.reason)
    }
}

impl std::error::Error for KeyError {}

/// A parsed cache key.
///
/// Path segments are opaque; the key is compared and hashed by its full
/// URI string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    uri: String,
    scheme_end: usize,
    bucket_end: usize,
}

impl CacheKey {
    pub fn parse(uri: impl Into<String>) -> Result<Self, KeyError> {
        let uri = uri.into();
        let err = |reason| KeyError {
            key: uri.clone(),
            reason,
        };

        let scheme_end = uri.find("://").ok_or_else(|| err("missing scheme"))?;
        let scheme = &uri[..scheme_end];
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(err("invalid scheme"));
        }

        let rest = &uri[scheme_end + 3..];
        let slash = rest.find('/').ok_or_else(|| err("missing path"))?;
        if slash == 0 {
            return Err(err("empty bucket"));
        }
        let path = &rest[slash + 1..];
        if path.is_empty() {
            return Err(err("missing path"));
        }
        if path.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
            return Err(err("empty or relative path segment"));
        }

        let bucket_end = scheme_end + 3 + slash;
        Ok(Self {
            uri,
            scheme_end,
            bucket_end,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.uri
    }

    pub fn scheme(&self) -> &str {
        &self.uri[..self.scheme_end]
    }

    pub fn bucket(&self) -> &str {
        &self.uri[self.scheme_end + 3..self.bucket_end]
    }

    /// Object path inside the bucket, without a leading slash.
    pub fn path(&self) -> &str {
        &self.uri[self.bucket_end + 1..]
    }

    /// Encoding implied by the path's extension.
    pub fn format(&self) -> Format {
        Format::from_path(self.path())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl std::str::FromStr for CacheKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.uri
    }
}
