//! Error types for the sync engine.

use notevault_core::CoreError;
use notevault_protocol::CryptoError;
use notevault_sync_protocol::{ResponseError, TransportError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The server could not be reached.
    #[error("connectivity failure: {0}")]
    ConnectivityFailure(String),

    /// The session is no longer valid; the user must sign in again.
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// The server answered with an error.
    #[error("server error {status}: {message}")]
    ServerError {
        /// HTTP-like status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Item manager, storage or model failure.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Encryption failure while preparing an upload.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a server error.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Converts an error carried in a response body.
    ///
    /// Such errors accompany a 400 status.
    pub fn from_response(error: ResponseError) -> Self {
        let message = error
            .message
            .or(error.tag)
            .unwrap_or_else(|| "request rejected".to_string());
        Self::server(400, message)
    }

    /// Returns true if this error can be retried.
    ///
    /// Session invalidity needs the user; crypto and core failures point at
    /// local data and will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectivityFailure(_) => true,
            SyncError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true for authentication failures.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, SyncError::SessionInvalid(_))
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connectivity(message) => SyncError::ConnectivityFailure(message),
            TransportError::SessionInvalid(message) => SyncError::SessionInvalid(message),
            TransportError::Server { status, message } => SyncError::ServerError { status, message },
            TransportError::Protocol(message) => SyncError::Protocol(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::ConnectivityFailure("offline".into()).is_retryable());
        assert!(SyncError::server(503, "busy").is_retryable());
        assert!(!SyncError::server(400, "bad").is_retryable());
        assert!(!SyncError::SessionInvalid("expired".into()).is_retryable());
        assert!(!SyncError::Protocol("garbled".into()).is_retryable());
    }

    #[test]
    fn transport_errors_map() {
        let err: SyncError = TransportError::SessionInvalid("401".into()).into();
        assert!(err.is_session_invalid());

        let err: SyncError = TransportError::server(500, "boom").into();
        assert!(matches!(err, SyncError::ServerError { status: 500, .. }));
        assert!(err.to_string().contains("boom"));
    }
}
