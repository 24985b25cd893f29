//! Sync request handling.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{ItemStore, SaveOutcome};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use notevault_sync_protocol::{ConflictEntry, ServerPayload, SyncRequest, SyncResponse};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const TOKEN_PREFIX: &str = "2:";

/// Handles sync requests for authenticated users.
#[derive(Debug)]
pub struct RequestHandler {
    config: ServerConfig,
    store: Arc<ItemStore>,
}

impl RequestHandler {
    /// Creates a handler over `store`.
    pub fn new(config: ServerConfig, store: Arc<ItemStore>) -> Self {
        Self { config, store }
    }

    /// Handles one sync round for `user`.
    ///
    /// Saves come first. Retrieved items are everything of the user's saved
    /// after the request's cursor (or sync token), minus the items saved by
    /// this request, paged by the smaller of the requested and configured
    /// limits. While a page is cut short the response carries a
    /// `cursor_token`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] for malformed tokens or an
    /// oversized upload.
    pub fn handle_sync(&self, user: &str, request: SyncRequest) -> ServerResult<SyncResponse> {
        if request.items.len() > self.config.max_upload_batch {
            return Err(ServerError::invalid_request(format!(
                "too many items: {} > {}",
                request.items.len(),
                self.config.max_upload_batch
            )));
        }
        let since = match request.cursor_token.as_deref().or(request.sync_token.as_deref()) {
            Some(token) => decode_token(token)?,
            None => 0,
        };

        let mut response = SyncResponse::default();
        let mut saved_uuids = HashSet::new();
        for item in request.items {
            match self.store.save_if_current(user, item.clone(), self.config.keep_revisions) {
                SaveOutcome::Saved(stored) => {
                    saved_uuids.insert(stored.payload.uuid.clone());
                    response.saved_items.push(metadata_only(stored.payload));
                }
                SaveOutcome::SyncConflict(server_item) => {
                    response.conflicts.push(ConflictEntry::sync_conflict(server_item));
                }
                SaveOutcome::UuidConflict => {
                    response.conflicts.push(ConflictEntry::uuid_conflict(item));
                }
            }
        }

        let limit = match request.limit {
            0 => self.config.max_page_limit,
            requested => requested.min(self.config.max_page_limit),
        };
        let mut pending = self
            .store
            .items_since(user, since, request.content_type.as_ref(), &saved_uuids);
        if pending.len() > limit {
            pending.truncate(limit);
            let last = pending.last().map_or(since, |item| item.sequence);
            response.cursor_token = Some(encode_token(last));
            response.sync_token = Some(encode_token(last));
        } else {
            response.sync_token = Some(encode_token(self.store.sequence()));
        }
        response.retrieved_items = pending.into_iter().map(|item| item.payload).collect();

        debug!(
            user = %user,
            saved = response.saved_items.len(),
            retrieved = response.retrieved_items.len(),
            conflicts = response.conflicts.len(),
            more = response.cursor_token.is_some(),
            "sync handled"
        );
        Ok(response)
    }
}

fn metadata_only(mut payload: ServerPayload) -> ServerPayload {
    payload.content = None;
    payload.enc_item_key = None;
    payload.auth_hash = None;
    payload
}

/// Encodes a sequence number as an opaque token.
pub(crate) fn encode_token(sequence: u64) -> String {
    STANDARD.encode(format!("{TOKEN_PREFIX}{sequence}"))
}

/// Decodes a token produced by [`encode_token`].
pub(crate) fn decode_token(token: &str) -> ServerResult<u64> {
    let bytes = STANDARD
        .decode(token)
        .map_err(|_| ServerError::invalid_request("malformed sync token"))?;
    let text = String::from_utf8(bytes).map_err(|_| ServerError::invalid_request("malformed sync token"))?;
    text.strip_prefix(TOKEN_PREFIX)
        .and_then(|sequence| sequence.parse().ok())
        .ok_or_else(|| ServerError::invalid_request("malformed sync token"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use notevault_model::ContentType;
    use notevault_sync_protocol::ConflictType;

    fn wire(uuid: &str) -> ServerPayload {
        ServerPayload {
            uuid: uuid.into(),
            content_type: ContentType::Note,
            content: Some("004:ciphertext".into()),
            enc_item_key: Some("004:key".into()),
            items_key_id: Some("k".into()),
            auth_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
            duplicate_of: None,
        }
    }

    fn create_handler(config: ServerConfig) -> RequestHandler {
        RequestHandler::new(config, Arc::new(ItemStore::new()))
    }

    #[test]
    fn token_round_trip() {
        assert_eq!(decode_token(&encode_token(42)).unwrap(), 42);
        assert!(decode_token("not base64!").is_err());
        assert!(decode_token(&STANDARD.encode("1:5")).is_err());
    }

    #[test]
    fn saved_items_carry_metadata_only() {
        let handler = create_handler(ServerConfig::default());
        let response = handler
            .handle_sync("a", SyncRequest::new(vec![wire("x")], 100))
            .unwrap();

        assert_eq!(response.saved_items.len(), 1);
        assert!(response.saved_items[0].content.is_none());
        assert!(response.retrieved_items.is_empty());
        assert!(response.sync_token.is_some());
        assert!(response.cursor_token.is_none());
    }

    #[test]
    fn other_devices_retrieve_saves() {
        let handler = create_handler(ServerConfig::default());
        let first = handler.handle_sync("a", SyncRequest::new(Vec::new(), 100)).unwrap();
        handler
            .handle_sync("a", SyncRequest::new(vec![wire("x")], 100))
            .unwrap();

        let response = handler
            .handle_sync("a", SyncRequest::new(Vec::new(), 100).with_sync_token(first.sync_token))
            .unwrap();
        assert_eq!(response.retrieved_items.len(), 1);
        assert_eq!(response.retrieved_items[0].content.as_deref(), Some("004:ciphertext"));
    }

    #[test]
    fn stale_save_reports_sync_conflict() {
        let handler = create_handler(ServerConfig::default());
        handler
            .handle_sync("a", SyncRequest::new(vec![wire("x")], 100))
            .unwrap();
        let mut stale = wire("x");
        stale.updated_at -= Duration::hours(1);

        let response = handler.handle_sync("a", SyncRequest::new(vec![stale], 100)).unwrap();
        assert!(response.saved_items.is_empty());
        assert_eq!(response.conflicts.len(), 1);
        assert_eq!(response.conflicts[0].kind, ConflictType::SyncConflict);
        assert!(response.conflicts[0].server_item.is_some());
    }

    #[test]
    fn foreign_uuid_reports_uuid_conflict() {
        let handler = create_handler(ServerConfig::default());
        handler
            .handle_sync("a", SyncRequest::new(vec![wire("x")], 100))
            .unwrap();

        let response = handler
            .handle_sync("b", SyncRequest::new(vec![wire("x")], 100))
            .unwrap();
        assert_eq!(response.conflicts.len(), 1);
        assert_eq!(response.conflicts[0].kind, ConflictType::UuidConflict);
        assert_eq!(response.conflicts[0].unsaved_item.as_ref().map(|i| i.uuid.as_str()), Some("x"));
        assert!(response.retrieved_items.is_empty());
    }

    #[test]
    fn retrieval_is_paged() {
        let handler = create_handler(ServerConfig::default().with_max_page_limit(2));
        let items: Vec<ServerPayload> = (0..5).map(|i| wire(&format!("item-{i}"))).collect();
        handler.handle_sync("a", SyncRequest::new(items, 100)).unwrap();

        let mut retrieved = 0;
        let mut cursor = None;
        let mut rounds = 0;
        loop {
            let response = handler
                .handle_sync("a", SyncRequest::new(Vec::new(), 100).with_cursor_token(cursor))
                .unwrap();
            retrieved += response.retrieved_items.len();
            rounds += 1;
            cursor = response.cursor_token;
            if cursor.is_none() {
                break;
            }
        }
        assert_eq!(retrieved, 5);
        assert_eq!(rounds, 3);
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let handler = create_handler(ServerConfig::default().with_max_upload_batch(1));
        let result = handler.handle_sync("a", SyncRequest::new(vec![wire("x"), wire("y")], 100));
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }
}
