//! Transport error types.

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors a transport can report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server could not be reached.
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// The session is no longer valid (HTTP 401).
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// The server answered with an error status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP-like status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Creates a connectivity error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity(message.into())
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates a server error.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
