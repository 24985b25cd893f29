//! Sync server facade.

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::store::ItemStore;
use notevault_sync_protocol::{RevisionSummary, ServerPayload, SyncRequest, SyncResponse};
use std::sync::Arc;
use tracing::info;

/// The reference sync server.
///
/// Every call authenticates its session token first. Accounts are implicit:
/// a user exists once a session has been created for it.
#[derive(Debug)]
pub struct SyncServer {
    config: ServerConfig,
    validator: TokenValidator,
    store: Arc<ItemStore>,
    handler: RequestHandler,
}

impl SyncServer {
    /// Creates a server with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(ItemStore::new());
        Self {
            validator: TokenValidator::new(&config),
            handler: RequestHandler::new(config.clone(), Arc::clone(&store)),
            store,
            config,
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the item store.
    pub fn store(&self) -> &Arc<ItemStore> {
        &self.store
    }

    /// Opens a session for `user_id` and returns its token.
    ///
    /// # Errors
    ///
    /// Returns an error if the user id is unusable in a token.
    pub fn create_session(&self, user_id: &str) -> ServerResult<String> {
        let token = self.validator.create_token(user_id)?;
        info!(user = %user_id, "session created");
        Ok(token)
    }

    /// Revokes a session. Later calls with its token fail with 401.
    pub fn revoke_session(&self, token: &str) {
        self.validator.revoke(token);
        info!("session revoked");
    }

    /// Handles a sync round.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] for invalid sessions and
    /// [`ServerError::InvalidRequest`] for malformed requests.
    pub fn sync(&self, token: &str, request: SyncRequest) -> ServerResult<SyncResponse> {
        let user = self.validator.validate_token(token)?;
        self.handler.handle_sync(&user, request)
    }

    /// Lists the revisions of an item.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] for invalid sessions.
    pub fn item_revisions(&self, token: &str, item_uuid: &str) -> ServerResult<Vec<RevisionSummary>> {
        let user = self.validator.validate_token(token)?;
        Ok(self.store.revisions(&user, item_uuid))
    }

    /// Fetches one revision.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] for invalid sessions and
    /// [`ServerError::NotFound`] for unknown revisions.
    pub fn item_revision(&self, token: &str, item_uuid: &str, revision_uuid: &str) -> ServerResult<ServerPayload> {
        let user = self.validator.validate_token(token)?;
        self.store
            .revision(&user, item_uuid, revision_uuid)
            .ok_or_else(|| ServerError::not_found(format!("revision {revision_uuid} of {item_uuid}")))
    }
}

impl Default for SyncServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notevault_model::ContentType;

    fn wire(uuid: &str) -> ServerPayload {
        ServerPayload {
            uuid: uuid.into(),
            content_type: ContentType::Note,
            content: Some("004:ciphertext".into()),
            enc_item_key: Some("004:key".into()),
            items_key_id: None,
            auth_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
            duplicate_of: None,
        }
    }

    #[test]
    fn revoked_sessions_are_rejected() {
        let server = SyncServer::default();
        let token = server.create_session("alice").unwrap();
        assert!(server.sync(&token, SyncRequest::new(Vec::new(), 10)).is_ok());

        server.revoke_session(&token);
        let err = server.sync(&token, SyncRequest::new(Vec::new(), 10)).unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn revisions_are_per_user() {
        let server = SyncServer::default();
        let alice = server.create_session("alice").unwrap();
        let bob = server.create_session("bob").unwrap();
        server.sync(&alice, SyncRequest::new(vec![wire("x")], 10)).unwrap();

        let revisions = server.item_revisions(&alice, "x").unwrap();
        assert_eq!(revisions.len(), 1);
        let payload = server.item_revision(&alice, "x", &revisions[0].uuid).unwrap();
        assert_eq!(payload.content.as_deref(), Some("004:ciphertext"));

        assert!(server.item_revisions(&bob, "x").unwrap().is_empty());
        assert!(matches!(
            server.item_revision(&bob, "x", &revisions[0].uuid),
            Err(ServerError::NotFound(_))
        ));
    }
}
