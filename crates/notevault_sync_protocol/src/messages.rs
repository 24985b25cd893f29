//! Sync wire messages.

use crate::error::{TransportError, TransportResult};
use chrono::{DateTime, Utc};
use notevault_model::{Content, ContentType, Payload, PayloadSource};
use serde::{Deserialize, Serialize};

/// API version sent with every sync request.
pub const API_VERSION: &str = "20200115";

/// Wire projection of a payload.
///
/// Carries only server-visible fields; dirty markers and decryption state
/// stay on the device. Content is always ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPayload {
    /// Item uuid.
    pub uuid: String,
    /// Schema tag.
    pub content_type: ContentType,
    /// Ciphertext string. Absent for tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Wrapped item key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_item_key: Option<String>,
    /// Uuid of the items key wrapping `enc_item_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_key_id: Option<String>,
    /// Detached MAC (protocol 001).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_hash: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last server-side update.
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Uuid of the item this one duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
}

impl ServerPayload {
    /// Projects a payload onto the wire.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] if the payload still carries
    /// plaintext content.
    pub fn from_payload(payload: &Payload) -> TransportResult<Self> {
        let content = match &payload.content {
            None => None,
            Some(Content::Encrypted(ciphertext)) => Some(ciphertext.clone()),
            Some(Content::Decrypted(_)) => {
                return Err(TransportError::protocol(format!(
                    "payload {} has plaintext content and cannot be uploaded",
                    payload.uuid
                )))
            }
        };
        Ok(Self {
            uuid: payload.uuid.clone(),
            content_type: payload.content_type.clone(),
            content,
            enc_item_key: payload.enc_item_key.clone(),
            items_key_id: payload.items_key_id.clone(),
            auth_hash: payload.auth_hash.clone(),
            created_at: payload.created_at,
            updated_at: payload.updated_at,
            deleted: payload.deleted,
            duplicate_of: payload.duplicate_of.clone(),
        })
    }

    /// Builds a local payload tagged with `source`.
    pub fn to_payload(&self, source: PayloadSource) -> Payload {
        Payload {
            uuid: self.uuid.clone(),
            content_type: self.content_type.clone(),
            content: self.content.clone().map(Content::Encrypted),
            enc_item_key: self.enc_item_key.clone(),
            items_key_id: self.items_key_id.clone(),
            auth_hash: self.auth_hash.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted: self.deleted,
            duplicate_of: self.duplicate_of.clone(),
            dirty: false,
            dirtied_date: None,
            dirty_count: 0,
            error_decrypting: false,
            error_decrypting_value_changed: false,
            waiting_for_key: false,
            last_sync_began: None,
            last_sync_end: None,
            source,
        }
    }
}

/// One sync round sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Dirty items to save.
    pub items: Vec<ServerPayload>,
    /// Position after the last completed sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    /// Position inside a paginated download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
    /// Maximum number of retrieved items.
    pub limit: usize,
    /// Restricts retrieved items to one content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    /// API version.
    pub api: String,
}

impl SyncRequest {
    /// Creates a request with the current API version.
    pub fn new(items: Vec<ServerPayload>, limit: usize) -> Self {
        Self {
            items,
            sync_token: None,
            cursor_token: None,
            limit,
            content_type: None,
            api: API_VERSION.to_string(),
        }
    }

    /// Sets the sync token.
    #[must_use]
    pub fn with_sync_token(mut self, token: Option<String>) -> Self {
        self.sync_token = token;
        self
    }

    /// Sets the cursor token.
    #[must_use]
    pub fn with_cursor_token(mut self, token: Option<String>) -> Self {
        self.cursor_token = token;
        self
    }

    /// Restricts retrieved items to one content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: Option<ContentType>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> TransportResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(json: &str) -> TransportResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Kind of a server-reported conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The server copy changed since the client last saw it.
    SyncConflict,
    /// The uuid belongs to another account.
    UuidConflict,
}

/// A conflict reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    /// Conflict kind.
    #[serde(rename = "type")]
    pub kind: ConflictType,
    /// Current server copy, for sync conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_item: Option<ServerPayload>,
    /// The rejected client item, for uuid conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsaved_item: Option<ServerPayload>,
}

impl ConflictEntry {
    /// A sync conflict carrying the server copy.
    pub fn sync_conflict(server_item: ServerPayload) -> Self {
        Self {
            kind: ConflictType::SyncConflict,
            server_item: Some(server_item),
            unsaved_item: None,
        }
    }

    /// A uuid conflict carrying the rejected item.
    pub fn uuid_conflict(unsaved_item: ServerPayload) -> Self {
        Self {
            kind: ConflictType::UuidConflict,
            server_item: None,
            unsaved_item: Some(unsaved_item),
        }
    }
}

/// Error body of a response or of an unsaved entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseError {
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Machine-readable tag such as `sync_conflict` or `uuid_conflict`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Legacy per-item rejection. Superseded by [`ConflictEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsavedEntry {
    /// The rejected item.
    pub item: ServerPayload,
    /// Why it was rejected.
    pub error: ResponseError,
}

/// The server's answer to a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Items saved from the request, metadata only.
    #[serde(default)]
    pub saved_items: Vec<ServerPayload>,
    /// Items changed on the server since `sync_token`.
    #[serde(default)]
    pub retrieved_items: Vec<ServerPayload>,
    /// Conflicts detected while saving.
    #[serde(default)]
    pub conflicts: Vec<ConflictEntry>,
    /// Legacy rejections.
    #[serde(default)]
    pub unsaved: Vec<UnsavedEntry>,
    /// New sync position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    /// Present while more retrieved items remain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
    /// Request-level error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl SyncResponse {
    /// Encodes to JSON.
    pub fn encode(&self) -> TransportResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(json: &str) -> TransportResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Total number of items the server touched in this round.
    pub fn item_count(&self) -> usize {
        self.saved_items.len() + self.retrieved_items.len()
    }
}

/// One entry of an item's server-side revision list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSummary {
    /// Revision id.
    pub uuid: String,
    /// Uuid of the item the revision belongs to.
    pub item_uuid: String,
    /// Schema tag.
    pub content_type: ContentType,
    /// When the revision was recorded.
    pub created_at: DateTime<Utc>,
    /// Item `updated_at` at the time of the revision.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use notevault_model::ItemContent;
    use serde_json::json;

    fn encrypted_payload() -> Payload {
        let mut payload = Payload::new(ContentType::Note, ItemContent::new());
        payload.content = Some(Content::Encrypted("004:a:b:c".into()));
        payload.enc_item_key = Some("004:d:e:f".into());
        payload.dirty = true;
        payload
    }

    #[test]
    fn plaintext_is_rejected() {
        let payload = Payload::new(ContentType::Note, ItemContent::with_title_and_text("t", "x"));
        assert!(matches!(
            ServerPayload::from_payload(&payload),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn projection_drops_local_fields() {
        let wire = ServerPayload::from_payload(&encrypted_payload()).unwrap();
        let value = serde_json::to_value(&wire).unwrap();
        assert!(value.get("dirty").is_none());
        assert!(value.get("errorDecrypting").is_none());
        assert_eq!(value["content"], json!("004:a:b:c"));

        let local = wire.to_payload(PayloadSource::RemoteRetrieved);
        assert!(!local.dirty);
        assert_eq!(local.source, PayloadSource::RemoteRetrieved);
        assert_eq!(local.encrypted_content(), Some("004:a:b:c"));
    }

    #[test]
    fn tombstones_have_no_content() {
        let mut payload = encrypted_payload();
        payload.content = None;
        payload.deleted = true;
        let wire = ServerPayload::from_payload(&payload).unwrap();
        assert!(wire.content.is_none());
        assert!(wire.to_payload(PayloadSource::RemoteSaved).content.is_none());
    }

    #[test]
    fn request_json_shape() {
        let wire = ServerPayload::from_payload(&encrypted_payload()).unwrap();
        let request = SyncRequest::new(vec![wire], 150).with_sync_token(Some("t1".into()));
        let json = request.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["sync_token"], json!("t1"));
        assert_eq!(value["api"], json!(API_VERSION));
        assert!(value.get("cursor_token").is_none());
        assert_eq!(SyncRequest::decode(&json).unwrap(), request);
    }

    #[test]
    fn response_with_conflicts_decodes() {
        let json = json!({
            "saved_items": [],
            "retrieved_items": [],
            "conflicts": [{
                "type": "sync_conflict",
                "server_item": {
                    "uuid": "u1",
                    "content_type": "Note",
                    "content": "004:a:b:c",
                    "created_at": "2021-01-01T00:00:00Z",
                    "updated_at": "2021-01-02T00:00:00Z"
                }
            }],
            "sync_token": "t2"
        })
        .to_string();
        let response = SyncResponse::decode(&json).unwrap();
        assert_eq!(response.conflicts[0].kind, ConflictType::SyncConflict);
        assert_eq!(response.conflicts[0].server_item.as_ref().unwrap().uuid, "u1");
        assert!(response.unsaved.is_empty());
        assert_eq!(response.sync_token.as_deref(), Some("t2"));
    }

    #[test]
    fn malformed_response_is_protocol_error() {
        assert!(matches!(
            SyncResponse::decode("{\"saved_items\": 3}"),
            Err(TransportError::Protocol(_))
        ));
    }
}
