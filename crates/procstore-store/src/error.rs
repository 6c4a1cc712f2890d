// ABOUTME: Error type shared by every storage operation.
// ABOUTME: Maps onto the structured Fault carried by the collaborator-facing result envelope.

use procstore_core::Fault;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage manager is closed")]
    Closed,

    #[error("storage manager called from inside its own transaction; use the transaction handle")]
    Reentrant,

    #[error("log store uses a separate file and cannot join this transaction")]
    SeparateLogStore,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Sqlite(_) => "sqlite",
            StorageError::Io(_) => "io",
            StorageError::Json(_) => "json",
            StorageError::Closed => "closed",
            StorageError::Reentrant => "reentrant",
            StorageError::SeparateLogStore => "separate_log_store",
            StorageError::Internal(_) => "internal",
        }
    }

    /// Whether a fresh attempt could plausibly succeed.
    ///
    /// Engine and I/O failures are treated as transient contention. Encoding
    /// failures, use after close, misuse inside a transaction, and caught
    /// panics are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Sqlite(_) | StorageError::Io(_))
    }
}

impl From<StorageError> for Fault {
    fn from(err: StorageError) -> Self {
        Fault::new(err.code(), err.to_string())
    }
}
