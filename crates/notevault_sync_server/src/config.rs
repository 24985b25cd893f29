//! Server configuration.

use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on retrieved items per response, whatever the client asks.
    pub max_page_limit: usize,
    /// Maximum items a single request may save.
    pub max_upload_batch: usize,
    /// Secret key for session tokens.
    pub auth_secret: Vec<u8>,
    /// Session token lifetime.
    pub token_expiry: Duration,
    /// Whether saves are recorded as revisions.
    pub keep_revisions: bool,
}

impl ServerConfig {
    /// Creates a configuration signing tokens with `auth_secret`.
    pub fn new(auth_secret: Vec<u8>) -> Self {
        Self {
            max_page_limit: 500,
            max_upload_batch: 500,
            auth_secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            keep_revisions: true,
        }
    }

    /// Sets the maximum retrieved items per response.
    pub fn with_max_page_limit(mut self, limit: usize) -> Self {
        self.max_page_limit = limit;
        self
    }

    /// Sets the maximum items per save.
    pub fn with_max_upload_batch(mut self, size: usize) -> Self {
        self.max_upload_batch = size;
        self
    }

    /// Sets the session token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Enables or disables the revision log.
    pub fn with_revisions(mut self, enabled: bool) -> Self {
        self.keep_revisions = enabled;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(b"notevault-reference-server-secret".to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_page_limit, 500);
        assert!(config.keep_revisions);
        assert!(!config.auth_secret.is_empty());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new(vec![1, 2, 3, 4])
            .with_max_page_limit(50)
            .with_max_upload_batch(10)
            .with_token_expiry(Duration::from_secs(60))
            .with_revisions(false);

        assert_eq!(config.max_page_limit, 50);
        assert_eq!(config.max_upload_batch, 10);
        assert_eq!(config.token_expiry, Duration::from_secs(60));
        assert!(!config.keep_revisions);
        assert_eq!(config.auth_secret, vec![1, 2, 3, 4]);
    }
}
