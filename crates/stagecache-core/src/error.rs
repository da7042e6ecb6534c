//! Error taxonomy for blob store access and memoized stage calls
//!
//! Only [`StoreError::NotFound`] means "cache miss". Every other variant is
//! a real failure that must reach the caller instead of triggering a
//! recomputation.

use std::sync::Arc;

/// Failure of a single blob store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No object at the URI.
    NotFound { uri: String },
    /// Transport, permission or I/O failure talking to the store.
    Unavailable { uri: String, message: String },
    /// The object exists but cannot be decoded as a table.
    Corrupt { uri: String, message: String },
    /// The table could not be encoded for writing.
    Encode { uri: String, message: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { uri } => write!(f, "not found: {uri}"),
            Self::Unavailable { uri, message } => write!(f, "store unavailable ({uri}): {message}"),
            Self::Corrupt { uri, message } => write!(f, "corrupt data at {uri}: {message}"),
            Self::Encode { uri, message } => write!(f, "cannot encode table for {uri}: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    pub fn unavailable(uri: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            uri: uri.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn uri(&self) -> &str {
        match self {
            Self::NotFound { uri }
            | Self::Unavailable { uri, .. }
            | Self::Corrupt { uri, .. }
            | Self::Encode { uri, .. } => uri,
        }
    }
}

/// Failure of a memoized stage call.
///
/// `Clone` so one shared computation can hand the same failure to every
/// caller waiting on it.
#[derive(Debug, Clone)]
pub enum MemoError {
    /// A store read or write failed for a reason other than absence.
    Store(StoreError),
    /// The key policy produced something that is not `scheme://bucket/path`.
    InvalidKey {
        stage: String,
        key: String,
        reason: String,
    },
    /// The wrapped stage function returned an error.
    ComputationFailed {
        stage: String,
        source: Arc<anyhow::Error>,
    },
    /// A spawned stage task panicked or was aborted.
    TaskFailed { message: String },
}

impl std::fmt::Display for MemoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::InvalidKey { stage, key, reason } => {
                write!(f, "{stage}: invalid cache key {key:?}: {reason}")
            }
            Self::ComputationFailed { stage, source } => write!(f, "{stage} failed: {source:#}"),
            Self::TaskFailed { message } => write!(f, "stage task failed: {message}"),
        }
    }
}

impl std::error::Error for MemoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::ComputationFailed { source, .. } => {
                let inner: &anyhow::Error = source;
                let err: &(dyn std::error::Error + 'static) = inner.as_ref();
                Some(err)
            }
            _ => None,
        }
    }
}

impl From<StoreError> for MemoError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl MemoError {
    /// Wrap a stage function's error.
    ///
    /// When the stage failed because one of its memoized upstream calls
    /// failed, that upstream error is returned as-is so the first failure in
    /// a chain surfaces unchanged.
    pub fn from_stage(stage: &str, err: anyhow::Error) -> Self {
        match err.downcast::<MemoError>() {
            Ok(upstream) => upstream,
            Err(err) => Self::ComputationFailed {
                stage: stage.to_string(),
                source: Arc::new(err),
            },
        }
    }

    /// The store error behind this failure, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }

    /// Name of the stage whose own computation failed.
    pub fn failed_stage(&self) -> Option<&str> {
        match self {
            Self::ComputationFailed { stage, .. } | Self::InvalidKey { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
