//! Transport abstraction for sync and revision requests.

use crate::error::{TransportError, TransportResult};
use crate::messages::{RevisionSummary, ServerPayload, SyncRequest, SyncResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport carries sync rounds to the server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
/// Timeouts are the transport's responsibility.
pub trait SyncTransport: Send + Sync {
    /// Performs one sync round.
    fn sync(&self, request: &SyncRequest) -> TransportResult<SyncResponse>;

    /// Checks if the transport can currently reach the server.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Access to server-side item revisions.
pub trait RevisionTransport: Send + Sync {
    /// Lists revisions of an item.
    fn get_item_revisions(&self, item_uuid: &str) -> TransportResult<Vec<RevisionSummary>>;

    /// Fetches one revision as an encrypted payload.
    fn get_item_revision(&self, item_uuid: &str, revision_uuid: &str) -> TransportResult<ServerPayload>;
}

/// A mock transport for testing.
///
/// Responses are queued and returned in order; every request is recorded.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    responses: Mutex<VecDeque<TransportResult<SyncResponse>>>,
    requests: Mutex<Vec<SyncRequest>>,
    revisions: Mutex<Vec<(RevisionSummary, ServerPayload)>>,
}

impl MockTransport {
    /// Creates a connected mock with no queued responses.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            revisions: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response.
    pub fn push_response(&self, response: SyncResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues an error.
    pub fn push_error(&self, error: TransportError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Registers a revision for the revision endpoints.
    pub fn add_revision(&self, summary: RevisionSummary, payload: ServerPayload) {
        self.revisions.lock().push((summary, payload));
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn sync(&self, request: &SyncRequest) -> TransportResult<SyncResponse> {
        if !self.is_connected() {
            return Err(TransportError::connectivity("mock transport is offline"));
        }
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(SyncResponse::default()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl RevisionTransport for MockTransport {
    fn get_item_revisions(&self, item_uuid: &str) -> TransportResult<Vec<RevisionSummary>> {
        Ok(self
            .revisions
            .lock()
            .iter()
            .filter(|(summary, _)| summary.item_uuid == item_uuid)
            .map(|(summary, _)| summary.clone())
            .collect())
    }

    fn get_item_revision(&self, item_uuid: &str, revision_uuid: &str) -> TransportResult<ServerPayload> {
        self.revisions
            .lock()
            .iter()
            .find(|(summary, _)| summary.item_uuid == item_uuid && summary.uuid == revision_uuid)
            .map(|(_, payload)| payload.clone())
            .ok_or_else(|| TransportError::server(404, format!("revision {revision_uuid} not found")))
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
            content: Some("004:a:b:c".into()),
            enc_item_key: Some("004:d:e:f".into()),
            items_key_id: None,
            auth_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
            duplicate_of: None,
        }
    }

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.set_connected(false);
        let result = transport.sync(&SyncRequest::new(vec![], 10));
        assert!(matches!(result, Err(TransportError::Connectivity(_))));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn mock_transport_queue_order() {
        let transport = MockTransport::new();
        let first = SyncResponse {
            sync_token: Some("1".into()),
            ..SyncResponse::default()
        };
        transport.push_response(first.clone());
        transport.push_error(TransportError::SessionInvalid("expired".into()));

        let request = SyncRequest::new(vec![wire("a")], 10);
        assert_eq!(transport.sync(&request).unwrap(), first);
        assert!(matches!(transport.sync(&request), Err(TransportError::SessionInvalid(_))));
        assert_eq!(transport.sync(&request).unwrap(), SyncResponse::default());
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(transport.requests()[0].items[0].uuid, "a");
    }

    #[test]
    fn mock_revisions() {
        let transport = MockTransport::new();
        let summary = RevisionSummary {
            uuid: "r1".into(),
            item_uuid: "a".into(),
            content_type: ContentType::Note,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        transport.add_revision(summary, wire("a"));

        assert_eq!(transport.get_item_revisions("a").unwrap().len(), 1);
        assert!(transport.get_item_revisions("b").unwrap().is_empty());
        assert_eq!(transport.get_item_revision("a", "r1").unwrap().uuid, "a");
        assert!(matches!(
            transport.get_item_revision("a", "r2"),
            Err(TransportError::Server { status: 404, .. })
        ));
    }
}
