//! Error types for NoteVault core.

use notevault_model::ModelError;
use notevault_protocol::CryptoError;
use notevault_storage::StorageError;
use notevault_sync_protocol::TransportError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Item model error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Encryption protocol error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Revision fetch failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Item not found.
    #[error("item not found: {uuid}")]
    ItemNotFound {
        /// The uuid that was looked up.
        uuid: String,
    },

    /// Persisted state could not be interpreted.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl CoreError {
    /// Creates an item-not-found error.
    pub fn item_not_found(uuid: impl Into<String>) -> Self {
        Self::ItemNotFound { uuid: uuid.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::item_not_found("abc");
        assert_eq!(err.to_string(), "item not found: abc");

        let err: CoreError = ModelError::unknown_uuid("xyz").into();
        assert!(err.to_string().contains("xyz"));

        let err: CoreError = CryptoError::authentication("bad mac").into();
        assert!(matches!(err, CoreError::Crypto(_)));
    }
}
