//! Server-side item store.

use chrono::{DateTime, Duration, Utc};
use notevault_model::ContentType;
use notevault_sync_protocol::{RevisionSummary, ServerPayload};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// An item as the server keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    /// The stored ciphertext envelope.
    pub payload: ServerPayload,
    /// Account that owns the uuid.
    pub owner: String,
    /// Sequence number of the last save.
    pub sequence: u64,
}

/// Outcome of a conditional save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The item was stored.
    Saved(StoredItem),
    /// The client's `updated_at` is stale; carries the current server copy.
    SyncConflict(ServerPayload),
    /// The uuid belongs to another account.
    UuidConflict,
}

#[derive(Debug, Clone)]
struct Revision {
    summary: RevisionSummary,
    payload: ServerPayload,
}

#[derive(Debug, Default)]
struct StoreInner {
    items: HashMap<String, StoredItem>,
    revisions: HashMap<String, Vec<Revision>>,
    sequence: u64,
}

/// Items of every account, ordered by a global save sequence.
///
/// The store maintains:
/// - The latest copy of each uuid and its owner
/// - A sequence number bumped on every save
/// - Revisions of each saved item
#[derive(Debug, Default)]
pub struct ItemStore {
    inner: RwLock<StoreInner>,
}

impl ItemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence number assigned so far.
    pub fn sequence(&self) -> u64 {
        self.inner.read().sequence
    }

    /// Current copy of an item.
    pub fn get(&self, uuid: &str) -> Option<StoredItem> {
        self.inner.read().items.get(uuid).cloned()
    }

    /// Number of items owned by `owner`, tombstones included.
    pub fn item_count(&self, owner: &str) -> usize {
        self.inner.read().items.values().filter(|i| i.owner == owner).count()
    }

    /// Saves `payload` for `owner` unless it conflicts.
    ///
    /// A save conflicts when the uuid is owned by another account, or when
    /// an existing copy has a different `updated_at` than the client sent.
    /// Saved items get a fresh `updated_at`, strictly later than the
    /// previous one. Tombstones lose their content.
    pub fn save_if_current(&self, owner: &str, mut payload: ServerPayload, keep_revision: bool) -> SaveOutcome {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.items.get(&payload.uuid) {
            if existing.owner != owner {
                return SaveOutcome::UuidConflict;
            }
            if existing.payload.updated_at != payload.updated_at {
                return SaveOutcome::SyncConflict(existing.payload.clone());
            }
        }

        let previous = inner.items.get(&payload.uuid).map(|i| i.payload.updated_at);
        payload.updated_at = next_timestamp(previous);
        if payload.deleted {
            payload.content = None;
            payload.enc_item_key = None;
            payload.auth_hash = None;
        }

        inner.sequence += 1;
        let stored = StoredItem {
            payload,
            owner: owner.to_string(),
            sequence: inner.sequence,
        };
        trace!(uuid = %stored.payload.uuid, sequence = stored.sequence, "item saved");

        if keep_revision && !stored.payload.deleted {
            let summary = RevisionSummary {
                uuid: uuid::Uuid::new_v4().to_string(),
                item_uuid: stored.payload.uuid.clone(),
                content_type: stored.payload.content_type.clone(),
                created_at: Utc::now(),
                updated_at: stored.payload.updated_at,
            };
            inner
                .revisions
                .entry(stored.payload.uuid.clone())
                .or_default()
                .push(Revision {
                    summary,
                    payload: stored.payload.clone(),
                });
        }
        inner.items.insert(stored.payload.uuid.clone(), stored.clone());
        SaveOutcome::Saved(stored)
    }

    /// Items of `owner` saved after `since`, in sequence order.
    pub fn items_since(
        &self,
        owner: &str,
        since: u64,
        content_type: Option<&ContentType>,
        exclude: &HashSet<String>,
    ) -> Vec<StoredItem> {
        let inner = self.inner.read();
        let mut items: Vec<StoredItem> = inner
            .items
            .values()
            .filter(|i| i.owner == owner && i.sequence > since)
            .filter(|i| content_type.map_or(true, |ct| &i.payload.content_type == ct))
            .filter(|i| !exclude.contains(&i.payload.uuid))
            .cloned()
            .collect();
        items.sort_by_key(|i| i.sequence);
        items
    }

    /// Revisions of an item owned by `owner`, oldest first.
    pub fn revisions(&self, owner: &str, item_uuid: &str) -> Vec<RevisionSummary> {
        let inner = self.inner.read();
        if inner.items.get(item_uuid).is_some_and(|i| i.owner != owner) {
            return Vec::new();
        }
        inner
            .revisions
            .get(item_uuid)
            .map(|revisions| revisions.iter().map(|r| r.summary.clone()).collect())
            .unwrap_or_default()
    }

    /// One revision of an item owned by `owner`.
    pub fn revision(&self, owner: &str, item_uuid: &str, revision_uuid: &str) -> Option<ServerPayload> {
        let inner = self.inner.read();
        if inner.items.get(item_uuid).is_some_and(|i| i.owner != owner) {
            return None;
        }
        inner
            .revisions
            .get(item_uuid)?
            .iter()
            .find(|r| r.summary.uuid == revision_uuid)
            .map(|r| r.payload.clone())
    }
}

fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(previous) if previous >= now => previous + Duration::microseconds(1),
        _ => now,
    }
}
