//! Configuration for the core services.

use notevault_model::ContentType;
use std::time::Duration;

/// History subsystem configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Entry count per item above which optimization runs.
    pub revision_threshold: usize,
    /// Coalescing window for saving session history to disk.
    pub persist_debounce: Duration,
    /// Content types whose changes are recorded.
    pub content_types: Vec<ContentType>,
    /// Whether optimization runs automatically when the threshold is exceeded.
    pub auto_optimize: bool,
    /// Whether session history is saved to disk.
    pub persistable: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            revision_threshold: 60,
            persist_debounce: Duration::from_secs(2),
            content_types: vec![ContentType::Note],
            auto_optimize: true,
            persistable: false,
        }
    }
}

impl HistoryConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the revision threshold.
    #[must_use]
    pub fn with_revision_threshold(mut self, threshold: usize) -> Self {
        self.revision_threshold = threshold;
        self
    }

    /// Sets the persist debounce window.
    #[must_use]
    pub fn with_persist_debounce(mut self, window: Duration) -> Self {
        self.persist_debounce = window;
        self
    }

    /// Sets the tracked content types.
    #[must_use]
    pub fn with_content_types(mut self, content_types: Vec<ContentType>) -> Self {
        self.content_types = content_types;
        self
    }

    /// Sets the default auto-optimize flag.
    #[must_use]
    pub fn with_auto_optimize(mut self, enabled: bool) -> Self {
        self.auto_optimize = enabled;
        self
    }

    /// Sets the default persistable flag.
    #[must_use]
    pub fn with_persistable(mut self, enabled: bool) -> Self {
        self.persistable = enabled;
        self
    }

    /// True if changes to `content_type` are recorded.
    pub fn tracks(&self, content_type: &ContentType) -> bool {
        self.content_types.contains(content_type)
    }
}

/// Whether anything is written to local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistencePolicy {
    /// Payloads and values are persisted.
    #[default]
    Default,
    /// Values live in memory only and persisted data is cleared.
    Ephemeral,
}

/// Whether local storage is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionPolicy {
    /// Encrypt whenever a key is available.
    #[default]
    Default,
    /// Store plaintext.
    Disabled,
}

/// Local storage policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoragePolicy {
    /// Persistence policy.
    pub persistence: PersistencePolicy,
    /// Encryption policy.
    pub encryption: EncryptionPolicy,
}

impl StoragePolicy {
    /// Sets the persistence policy.
    #[must_use]
    pub fn with_persistence(mut self, persistence: PersistencePolicy) -> Self {
        self.persistence = persistence;
        self
    }

    /// Sets the encryption policy.
    #[must_use]
    pub fn with_encryption(mut self, encryption: EncryptionPolicy) -> Self {
        self.encryption = encryption;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_defaults() {
        let config = HistoryConfig::default();
        assert_eq!(config.revision_threshold, 60);
        assert_eq!(config.persist_debounce, Duration::from_secs(2));
        assert!(config.tracks(&ContentType::Note));
        assert!(!config.tracks(&ContentType::Tag));
        assert!(config.auto_optimize);
        assert!(!config.persistable);
    }

    #[test]
    fn builder_pattern() {
        let config = HistoryConfig::new()
            .with_revision_threshold(10)
            .with_content_types(vec![ContentType::Note, ContentType::Tag])
            .with_persistable(true);
        assert_eq!(config.revision_threshold, 10);
        assert!(config.tracks(&ContentType::Tag));
        assert!(config.persistable);

        let policy = StoragePolicy::default().with_encryption(EncryptionPolicy::Disabled);
        assert_eq!(policy.persistence, PersistencePolicy::Default);
        assert_eq!(policy.encryption, EncryptionPolicy::Disabled);
    }
}
