//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persisted data is structurally invalid.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the storage lock.
    #[error("storage is locked by another process: {0}")]
    Locked(String),

    /// The backend refused the write.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
