//! Error types for the encryption protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by the encryption protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The ciphertext or MAC did not authenticate.
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// The wrapped item key could not be unwrapped with the available key.
    #[error("key mismatch: {0}")]
    KeyMismatch(String),

    /// The version tag is not one of the supported versions.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// The ciphertext string is structurally invalid.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// No key is available for the requested operation.
    #[error("no key available: {0}")]
    MissingKey(String),

    /// Key parameters are incomplete or inconsistent.
    #[error("invalid key params: {0}")]
    InvalidKeyParams(String),

    /// The key-derivation cost is below the version's minimum.
    #[error("cost {cost} is below the minimum {minimum} for version {version}")]
    CostTooLow {
        /// Protocol version.
        version: String,
        /// Requested cost.
        cost: u32,
        /// Minimum allowed cost.
        minimum: u32,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),
}

impl CryptoError {
    /// Creates an authentication failure.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::AuthenticationFailure(message.into())
    }

    /// Creates a malformed-ciphertext error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedCiphertext(message.into())
    }

    /// Creates a key-mismatch error.
    pub fn key_mismatch(message: impl Into<String>) -> Self {
        Self::KeyMismatch(message.into())
    }

    /// True for errors that indicate corruption or an outdated client.
    ///
    /// These are reported distinctly and never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CryptoError::MalformedCiphertext(_) | CryptoError::UnsupportedVersion(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CryptoError::malformed("x").is_fatal());
        assert!(CryptoError::UnsupportedVersion("009".into()).is_fatal());
        assert!(!CryptoError::authentication("mac").is_fatal());
        assert!(!CryptoError::key_mismatch("k").is_fatal());
    }

    #[test]
    fn cost_display() {
        let err = CryptoError::CostTooLow {
            version: "004".into(),
            cost: 10,
            minimum: 500_000,
        };
        assert!(err.to_string().contains("500000"));
    }
}
