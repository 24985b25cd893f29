//! Error types for the sync server.

use notevault_sync_protocol::TransportError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, expired, revoked or forged session token.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Unknown item or revision.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Creates an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a not-authorized error.
    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::NotAuthorized(message.into())
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::NotFound(_) => 404,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

impl From<ServerError> for TransportError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::NotAuthorized(message) => TransportError::SessionInvalid(message),
            other => TransportError::server(other.status(), other.to_string()),
        }
    }
}
