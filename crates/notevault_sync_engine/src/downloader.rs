//! Stateless download of the whole account.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use notevault_model::{ContentType, Payload, PayloadSource};
use notevault_protocol::{ItemsKeyMaterial, ProtocolService, WrappingKey};
use notevault_sync_protocol::{SyncRequest, SyncTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pages through every item on the server.
///
/// The downloader sends no items and keeps its tokens to itself, so the
/// coordinator's sync position is unaffected.
pub struct AccountDownloader {
    transport: Arc<dyn SyncTransport>,
    protocol: Arc<ProtocolService>,
    limit: usize,
    max_rounds: usize,
    content_type: Option<ContentType>,
}

impl AccountDownloader {
    /// Creates a downloader using the account page size from `config`.
    pub fn new(transport: Arc<dyn SyncTransport>, protocol: Arc<ProtocolService>, config: &SyncConfig) -> Self {
        Self {
            transport,
            protocol,
            limit: config.account_download_limit,
            max_rounds: config.max_rounds.saturating_mul(16),
            content_type: None,
        }
    }

    /// Restricts the download to one content type.
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Downloads and decrypts every item.
    ///
    /// Items keys are decrypted first so that items under them can be read
    /// when the caller registers the keys. Payloads that fail to decrypt
    /// are returned flagged.
    ///
    /// # Errors
    ///
    /// Returns transport failures.
    pub fn run(&self) -> SyncResult<Vec<Payload>> {
        let mut payloads = Vec::new();
        let mut cursor: Option<String> = None;
        let mut rounds = 0;
        loop {
            let request = SyncRequest::new(Vec::new(), self.limit)
                .with_cursor_token(cursor.take())
                .with_content_type(self.content_type.clone());
            let response = self.transport.sync(&request)?;
            if let Some(error) = response.error {
                return Err(SyncError::from_response(error));
            }
            payloads.extend(
                response
                    .retrieved_items
                    .iter()
                    .map(|item| item.to_payload(PayloadSource::RemoteRetrieved)),
            );
            rounds += 1;
            match response.cursor_token {
                Some(next) if rounds < self.max_rounds => cursor = Some(next),
                Some(_) => {
                    warn!(rounds, "account download stopped at round bound");
                    break;
                }
                None => break,
            }
        }
        debug!(items = payloads.len(), rounds, "account downloaded");

        let (keys, others): (Vec<Payload>, Vec<Payload>) = payloads
            .into_iter()
            .partition(|p| p.content_type == ContentType::ItemsKey);
        let mut decrypted = self.protocol.decrypt_payloads(&keys).payloads;

        // Downloaded keys are not in the ring yet.
        let downloaded: HashMap<String, WrappingKey> = decrypted
            .iter()
            .filter_map(|key| {
                let content = key.decrypted_content()?;
                ItemsKeyMaterial::from_content(key.uuid.clone(), content)
                    .ok()
                    .map(|material| (key.uuid.clone(), WrappingKey::Items(material)))
            })
            .collect();
        for payload in &others {
            let key = payload
                .items_key_id
                .as_ref()
                .and_then(|id| downloaded.get(id));
            let result = match key {
                Some(key) => self.protocol.decrypt_payload_with_key(payload, key),
                None => self.protocol.decrypt_payload(payload),
            };
            match result {
                Ok(payload) => decrypted.push(payload),
                Err(err) => {
                    warn!(uuid = %payload.uuid, error = %err, "downloaded payload cannot be decrypted");
                    let mut failed = payload.clone();
                    failed.error_decrypting_value_changed = !payload.error_decrypting;
                    failed.error_decrypting = true;
                    decrypted.push(failed);
                }
            }
        }
        Ok(decrypted)
    }
}

impl std::fmt::Debug for AccountDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountDownloader")
            .field("limit", &self.limit)
            .field("content_type", &self.content_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notevault_sync_protocol::{MockTransport, ServerPayload, SyncResponse};

    fn wire(uuid: &str) -> ServerPayload {
        ServerPayload {
            uuid: uuid.into(),
            content_type: ContentType::Note,
            content: None,
            enc_item_key: None,
            items_key_id: None,
            auth_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: true,
            duplicate_of: None,
        }
    }

    #[test]
    fn pages_until_cursor_is_exhausted() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(SyncResponse {
            retrieved_items: vec![wire("a"), wire("b")],
            cursor_token: Some("c1".into()),
            ..SyncResponse::default()
        });
        transport.push_response(SyncResponse {
            retrieved_items: vec![wire("c")],
            ..SyncResponse::default()
        });

        let downloader = AccountDownloader::new(
            transport.clone(),
            Arc::new(ProtocolService::new()),
            &SyncConfig::default(),
        );
        let payloads = downloader.run().unwrap();

        assert_eq!(payloads.len(), 3);
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.items.is_empty() && r.sync_token.is_none()));
        assert_eq!(requests[0].limit, 500);
        assert_eq!(requests[1].cursor_token.as_deref(), Some("c1"));
    }

    #[test]
    fn transport_failure_propagates() {
        let transport = Arc::new(MockTransport::new());
        transport.set_connected(false);
        let downloader = AccountDownloader::new(transport, Arc::new(ProtocolService::new()), &SyncConfig::default());
        assert!(matches!(downloader.run(), Err(SyncError::ConnectivityFailure(_))));
    }
}
