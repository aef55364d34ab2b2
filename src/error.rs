//! Error types for probing, persistence and the validation engine

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single probe attempt through a candidate proxy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// Timeout, refused/reset connection or proxy negotiation failure
    #[error("transient failure: {0}")]
    Transient(String),
    /// The proxy answered, but not with 200 OK
    #[error("rejected with HTTP status {0}")]
    Rejected(u16),
    /// Anything that retrying will not fix
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl AttemptError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    /// Whether another attempt with the same protocol is worthwhile
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Rejected(_))
    }

    /// Whether the executor should pause before the next attempt
    pub fn wants_backoff(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors raised by the result store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The output location cannot be written at all
    #[error("output target {path:?} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("persisted result set {path:?} is malformed: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode result set: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Fatal errors abort a running batch; everything else only loses one result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors that abort a whole validation batch
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
    #[error("admission gate closed")]
    GateClosed,
}
