//! The payload envelope.

use crate::content::ItemContent;
use crate::content_type::ContentType;
use crate::source::PayloadSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generates a fresh client-side uuid.
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Payload content: either structured plaintext or an opaque ciphertext string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Versioned ciphertext string.
    Encrypted(String),
    /// Structured plaintext.
    Decrypted(ItemContent),
}

/// The wire/storage unit for one item.
///
/// Payloads are values: every change produces a new payload. Local-only
/// bookkeeping (dirty markers, decryption state, sync timestamps) is
/// serialized under its own keys so that storage keeps it while wire
/// projections drop it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Stable identity.
    pub uuid: String,
    /// Schema tag.
    pub content_type: ContentType,
    /// Plaintext or ciphertext content. Absent for server tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Wrapped per-item key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_item_key: Option<String>,
    /// Uuid of the items key that wraps `enc_item_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_key_id: Option<String>,
    /// Detached MAC used by the oldest protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_hash: Option<String>,
    /// Creation time.
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    /// Last server-side update time.
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Uuid of the item this payload duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    /// Local change not yet acknowledged by the server.
    #[serde(default)]
    pub dirty: bool,
    /// When the payload last became dirty.
    #[serde(rename = "dirtiedDate", default, skip_serializing_if = "Option::is_none")]
    pub dirtied_date: Option<DateTime<Utc>>,
    /// Dirty-generation counter, reset when a sync batch is cut.
    #[serde(rename = "dirtyCount", default)]
    pub dirty_count: u64,
    /// Decryption failed.
    #[serde(rename = "errorDecrypting", default)]
    pub error_decrypting: bool,
    /// `error_decrypting` flipped during the last decryption.
    #[serde(skip)]
    pub error_decrypting_value_changed: bool,
    /// The wrapping key is not available yet.
    #[serde(rename = "waitingForKey", default)]
    pub waiting_for_key: bool,
    /// When the last sync that included this payload started.
    #[serde(rename = "lastSyncBegan", default, skip_serializing_if = "Option::is_none")]
    pub last_sync_began: Option<DateTime<Utc>>,
    /// When the last sync that included this payload finished.
    #[serde(rename = "lastSyncEnd", default, skip_serializing_if = "Option::is_none")]
    pub last_sync_end: Option<DateTime<Utc>>,
    /// Provenance.
    #[serde(skip)]
    pub source: PayloadSource,
}

impl Payload {
    /// Creates a new decrypted payload with a fresh uuid.
    pub fn new(content_type: ContentType, content: ItemContent) -> Self {
        Self::with_uuid(generate_uuid(), content_type, content)
    }

    /// Creates a new decrypted payload with the given uuid.
    pub fn with_uuid(uuid: impl Into<String>, content_type: ContentType, content: ItemContent) -> Self {
        let now = Utc::now();
        Self {
            uuid: uuid.into(),
            content_type,
            content: Some(Content::Decrypted(content)),
            enc_item_key: None,
            items_key_id: None,
            auth_hash: None,
            created_at: now,
            updated_at: now,
            deleted: false,
            duplicate_of: None,
            dirty: false,
            dirtied_date: None,
            dirty_count: 0,
            error_decrypting: false,
            error_decrypting_value_changed: false,
            waiting_for_key: false,
            last_sync_began: None,
            last_sync_end: None,
            source: PayloadSource::Constructor,
        }
    }

    /// Returns a copy tagged with `source`.
    #[must_use]
    pub fn with_source(mut self, source: PayloadSource) -> Self {
        self.source = source;
        self
    }

    /// Returns a copy marked dirty at `now`.
    #[must_use]
    pub fn with_dirty(mut self, now: DateTime<Utc>) -> Self {
        self.dirty = true;
        self.dirtied_date = Some(now);
        self.dirty_count += 1;
        self
    }

    /// Returns a copy with dirty markers cleared.
    #[must_use]
    pub fn with_clean(mut self) -> Self {
        self.dirty = false;
        self.dirtied_date = None;
        self.dirty_count = 0;
        self
    }

    /// Returns the decrypted content, if any.
    pub fn decrypted_content(&self) -> Option<&ItemContent> {
        match &self.content {
            Some(Content::Decrypted(content)) => Some(content),
            _ => None,
        }
    }

    /// Returns the ciphertext string, if the content is encrypted.
    pub fn encrypted_content(&self) -> Option<&str> {
        match &self.content {
            Some(Content::Encrypted(content)) => Some(content),
            _ => None,
        }
    }

    /// True if the content is a ciphertext string.
    pub fn is_encrypted(&self) -> bool {
        matches!(self.content, Some(Content::Encrypted(_)))
    }

    /// True if the payload may be removed permanently.
    pub fn discardable(&self) -> bool {
        self.deleted && !self.dirty
    }

    /// Copies server-owned metadata from `server` onto this payload.
    ///
    /// Content, keys and local bookkeeping are left untouched.
    #[must_use]
    pub fn merged_with_server_metadata(mut self, server: &Payload) -> Self {
        self.created_at = server.created_at;
        self.updated_at = server.updated_at;
        self.deleted = server.deleted;
        if server.duplicate_of.is_some() {
            self.duplicate_of = server.duplicate_of.clone();
        }
        self
    }
}
