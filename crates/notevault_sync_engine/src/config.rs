//! Configuration for the sync coordinator.

use notevault_sync_protocol::API_VERSION;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of dirty items uploaded per request.
    pub upload_limit: usize,
    /// Page size requested from the server during sync.
    pub download_limit: usize,
    /// Page size used by the account downloader.
    pub account_download_limit: usize,
    /// Safety bound on rounds per sync operation.
    pub max_rounds: usize,
    /// Retrieved plus saved items that count as a major data change.
    pub major_change_threshold: usize,
    /// API version sent with every request.
    pub api_version: String,
}

impl SyncConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            upload_limit: 150,
            download_limit: 150,
            account_download_limit: 500,
            max_rounds: 64,
            major_change_threshold: 15,
            api_version: API_VERSION.to_string(),
        }
    }

    /// Sets the upload batch size.
    pub fn with_upload_limit(mut self, limit: usize) -> Self {
        self.upload_limit = limit.max(1);
        self
    }

    /// Sets the download page size.
    pub fn with_download_limit(mut self, limit: usize) -> Self {
        self.download_limit = limit.max(1);
        self
    }

    /// Sets the account downloader page size.
    pub fn with_account_download_limit(mut self, limit: usize) -> Self {
        self.account_download_limit = limit.max(1);
        self
    }

    /// Sets the round bound.
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Sets the major data change threshold.
    pub fn with_major_change_threshold(mut self, threshold: usize) -> Self {
        self.major_change_threshold = threshold;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
