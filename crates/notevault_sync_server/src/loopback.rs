//! In-process transport to a [`SyncServer`].

use crate::server::SyncServer;
use notevault_sync_protocol::{
    RevisionSummary, RevisionTransport, ServerPayload, SyncRequest, SyncResponse, SyncTransport,
    TransportError, TransportResult,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Drives a [`SyncServer`] through the client transport traits.
///
/// Requests and responses pass through their JSON encoding, so the wire
/// format is exercised exactly as over HTTP. The transport can be switched
/// offline to simulate connectivity loss.
#[derive(Debug)]
pub struct LoopbackTransport {
    server: Arc<SyncServer>,
    token: RwLock<String>,
    connected: AtomicBool,
    requests: AtomicUsize,
}

impl LoopbackTransport {
    /// Creates a transport that authenticates with `token`.
    pub fn new(server: Arc<SyncServer>, token: impl Into<String>) -> Self {
        Self {
            server,
            token: RwLock::new(token.into()),
            connected: AtomicBool::new(true),
            requests: AtomicUsize::new(0),
        }
    }

    /// Simulates connectivity changes.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Replaces the session token.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }

    /// Current session token.
    pub fn token(&self) -> String {
        self.token.read().clone()
    }

    /// Number of sync requests that reached the server.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// The server behind this transport.
    pub fn server(&self) -> &Arc<SyncServer> {
        &self.server
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::connectivity("server unreachable"))
        }
    }
}

impl SyncTransport for LoopbackTransport {
    fn sync(&self, request: &SyncRequest) -> TransportResult<SyncResponse> {
        self.ensure_connected()?;
        let request = SyncRequest::decode(&request.encode()?)?;
        self.requests.fetch_add(1, Ordering::SeqCst);
        trace!(items = request.items.len(), "loopback sync");

        let response = self.server.sync(&self.token(), request)?;
        SyncResponse::decode(&response.encode()?)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl RevisionTransport for LoopbackTransport {
    fn get_item_revisions(&self, item_uuid: &str) -> TransportResult<Vec<RevisionSummary>> {
        self.ensure_connected()?;
        Ok(self.server.item_revisions(&self.token(), item_uuid)?)
    }

    fn get_item_revision(&self, item_uuid: &str, revision_uuid: &str) -> TransportResult<ServerPayload> {
        self.ensure_connected()?;
        Ok(self.server.item_revision(&self.token(), item_uuid, revision_uuid)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> LoopbackTransport {
        let server = Arc::new(SyncServer::default());
        let token = server.create_session("alice").unwrap();
        LoopbackTransport::new(server, token)
    }

    #[test]
    fn offline_is_connectivity_failure() {
        let transport = transport();
        transport.set_connected(false);
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.sync(&SyncRequest::new(Vec::new(), 10)),
            Err(TransportError::Connectivity(_))
        ));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn revoked_token_is_session_invalid() {
        let transport = transport();
        assert!(transport.sync(&SyncRequest::new(Vec::new(), 10)).is_ok());

        transport.server().revoke_session(&transport.token());
        assert!(matches!(
            transport.sync(&SyncRequest::new(Vec::new(), 10)),
            Err(TransportError::SessionInvalid(_))
        ));
    }

    #[test]
    fn malformed_token_is_server_error() {
        let transport = transport();
        let request = SyncRequest::new(Vec::new(), 10).with_sync_token(Some("%%%".into()));
        assert!(matches!(
            transport.sync(&request),
            Err(TransportError::Server { status: 400, .. })
        ));
    }
}
