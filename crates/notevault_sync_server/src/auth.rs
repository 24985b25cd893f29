//! Session tokens.
//!
//! Tokens are HMAC-SHA256 signed and carry an issue timestamp for expiry
//! checks.
//!
//! ## Token Format
//!
//! `base64url(user_id ":" issued_millis) "." hex(hmac)`
//!
//! Revoking a token remembers its signature; later requests with it are
//! rejected as not authorized.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Issues and validates session tokens.
pub struct TokenValidator {
    secret: Vec<u8>,
    token_expiry: Duration,
    revoked: RwLock<HashSet<String>>,
}

impl TokenValidator {
    /// Creates a validator from the server configuration.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            secret: config.auth_secret.clone(),
            token_expiry: config.token_expiry,
            revoked: RwLock::new(HashSet::new()),
        }
    }

    /// Creates a session token for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] if the user id contains a colon.
    pub fn create_token(&self, user_id: &str) -> ServerResult<String> {
        if user_id.contains(':') {
            return Err(ServerError::invalid_request("user id must not contain ':'"));
        }
        let claims = format!("{user_id}:{}", now_millis());
        let signature = self.sign(claims.as_bytes())?;
        Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(claims), hex::encode(signature)))
    }

    /// Validates a token and returns the user it belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] for malformed, forged, expired
    /// or revoked tokens.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        let (encoded, signature_hex) = token
            .split_once('.')
            .ok_or_else(|| ServerError::not_authorized("malformed token"))?;
        if self.revoked.read().contains(signature_hex) {
            return Err(ServerError::not_authorized("session revoked"));
        }

        let claims = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| ServerError::not_authorized("malformed token"))?;
        let signature = hex::decode(signature_hex).map_err(|_| ServerError::not_authorized("malformed token"))?;
        let mut mac = self.mac()?;
        mac.update(&claims);
        mac.verify_slice(&signature)
            .map_err(|_| ServerError::not_authorized("invalid signature"))?;

        let claims = String::from_utf8(claims).map_err(|_| ServerError::not_authorized("malformed token"))?;
        let (user_id, issued) = claims
            .rsplit_once(':')
            .ok_or_else(|| ServerError::not_authorized("malformed token"))?;
        let issued: u64 = issued
            .parse()
            .map_err(|_| ServerError::not_authorized("malformed token"))?;
        let expiry = u64::try_from(self.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued.saturating_add(expiry) {
            return Err(ServerError::not_authorized("token expired"));
        }
        Ok(user_id.to_string())
    }

    /// Revokes a token. Further validation of it fails.
    pub fn revoke(&self, token: &str) {
        if let Some((_, signature)) = token.split_once('.') {
            self.revoked.write().insert(signature.to_string());
        }
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| ServerError::Internal(e.to_string()))
    }

    fn sign(&self, data: &[u8]) -> ServerResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("secret", &"[REDACTED]")
            .field("token_expiry", &self.token_expiry)
            .field("revoked", &self.revoked.read().len())
            .finish()
    }
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}
