//! History manager.

use super::flush::DebouncedFlush;
use super::item_history::ItemHistory;
use super::server::ServerHistory;
use super::session::HistorySession;
use crate::clock::Clock;
use crate::config::HistoryConfig;
use crate::error::CoreResult;
use crate::item_manager::ItemManager;
use crate::observer::{ContentTypeFilter, ItemsChange, ObserverId};
use crate::storage_service::{StorageService, ValueMode};
use notevault_model::{PayloadSource, PolicyRegistry, DEFAULT_HISTORY_TEXT_FIELD};
use notevault_protocol::ProtocolService;
use notevault_sync_protocol::RevisionTransport;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PERSISTABLE_KEY: &str = "sessionHistoryPersistable";
const REVISIONS_KEY: &str = "sessionHistoryRevisions";
const OPTIMIZE_KEY: &str = "sessionHistoryOptimize";

#[derive(Debug)]
struct HistoryState {
    session: HistorySession,
    persistable: bool,
    auto_optimize: bool,
    flush: DebouncedFlush,
}

/// Records session history from item changes and fetches server history.
///
/// Local edits are not recorded as they happen; an entry is added when the
/// change comes back from storage or the server. Saving to disk is
/// debounced: the observer only moves a deadline, and the host calls
/// [`HistoryManager::flush_if_due`] from its own timer.
pub struct HistoryManager {
    items: Arc<ItemManager>,
    storage: Arc<StorageService>,
    protocol: Arc<ProtocolService>,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<HistoryState>>,
    observer: ObserverId,
}

impl HistoryManager {
    /// Creates a manager and starts observing `items`.
    pub fn new(
        items: Arc<ItemManager>,
        storage: Arc<StorageService>,
        protocol: Arc<ProtocolService>,
        config: HistoryConfig,
    ) -> Self {
        let clock = items.clock();
        let state = Arc::new(Mutex::new(HistoryState {
            session: HistorySession::new(config.revision_threshold),
            persistable: config.persistable,
            auto_optimize: config.auto_optimize,
            flush: DebouncedFlush::new(config.persist_debounce),
        }));

        let observed = Arc::clone(&state);
        let observer_clock = Arc::clone(&clock);
        let policies = items.policies().clone();
        let observer = items.add_observer(ContentTypeFilter::Only(config.content_types), move |change| {
            record_change(&mut observed.lock(), &policies, change, observer_clock.now());
        });

        Self {
            items,
            storage,
            protocol,
            clock,
            state,
            observer,
        }
    }

    /// Loads flags and persisted session history from storage values.
    ///
    /// Flags that were never stored keep their configured defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted history is corrupted.
    pub fn initialize_from_disk(&self) -> CoreResult<()> {
        let persistable = self
            .storage
            .get_value(PERSISTABLE_KEY, ValueMode::Default)
            .and_then(|v| v.as_bool());
        let auto_optimize = self
            .storage
            .get_value(OPTIMIZE_KEY, ValueMode::Default)
            .and_then(|v| v.as_bool());
        let session = self
            .storage
            .get_value(REVISIONS_KEY, ValueMode::Default)
            .map(serde_json::from_value::<HistorySession>)
            .transpose()?;

        let mut state = self.state.lock();
        if let Some(persistable) = persistable {
            state.persistable = persistable;
        }
        if let Some(auto_optimize) = auto_optimize {
            state.auto_optimize = auto_optimize;
        }
        if let Some(mut session) = session {
            session.set_item_revision_threshold(state.session.item_revision_threshold());
            state.session = session;
        }
        debug!(
            persistable = state.persistable,
            auto_optimize = state.auto_optimize,
            "session history initialized"
        );
        Ok(())
    }

    /// True if session history is saved to disk.
    pub fn is_disk_enabled(&self) -> bool {
        self.state.lock().persistable
    }

    /// True if histories are optimized as they grow.
    pub fn is_auto_optimize_enabled(&self) -> bool {
        self.state.lock().auto_optimize
    }

    /// Session history of one item. Empty if nothing was recorded.
    pub fn session_history_for_item(&self, uuid: &str) -> ItemHistory {
        self.state
            .lock()
            .session
            .history_for_item(uuid)
            .cloned()
            .unwrap_or_default()
    }

    /// Fetches, decrypts and folds the server revisions of one item.
    ///
    /// Revisions that cannot be decrypted are left out.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the revision list or a revision
    /// cannot be fetched.
    pub fn fetch_server_history_for_item(
        &self,
        uuid: &str,
        transport: &dyn RevisionTransport,
    ) -> CoreResult<ServerHistory> {
        let summaries = transport.get_item_revisions(uuid)?;
        let mut revisions = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            let mut payload = transport
                .get_item_revision(uuid, &summary.uuid)?
                .to_payload(PayloadSource::ServerHistory);
            payload.uuid = uuid.to_string();
            match self.protocol.decrypt_payload(&payload) {
                Ok(decrypted) => revisions.push(decrypted),
                Err(err) => warn!(uuid = %uuid, revision = %summary.uuid, error = %err, "revision is malformed"),
            }
        }
        debug!(uuid = %uuid, revisions = revisions.len(), "fetched server history");
        let text_field = revisions
            .first()
            .map_or(DEFAULT_HISTORY_TEXT_FIELD, |revision| {
                self.items.policies().history_text_field(&revision.content_type)
            });
        Ok(ServerHistory::from_revisions(uuid, revisions, text_field))
    }

    /// Forgets one item's session history and saves.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn clear_history_for_item(&self, uuid: &str) -> CoreResult<()> {
        self.state.lock().session.clear_item_history(uuid);
        self.save_to_disk()
    }

    /// Forgets all session history, in memory and on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn clear_all_history(&self) -> CoreResult<()> {
        {
            let mut state = self.state.lock();
            state.session.clear_all_history();
            state.flush.cancel();
        }
        self.storage.remove_value(REVISIONS_KEY)
    }

    /// Flips disk saving. Turning it off deletes the saved history.
    /// Returns the new setting.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn toggle_disk_saving(&self) -> CoreResult<bool> {
        let persistable = {
            let mut state = self.state.lock();
            state.persistable = !state.persistable;
            if !state.persistable {
                state.flush.cancel();
            }
            state.persistable
        };
        self.storage
            .set_value(PERSISTABLE_KEY, Value::Bool(persistable), ValueMode::Default)?;
        if persistable {
            self.save_to_disk()?;
        } else {
            self.storage.remove_value(REVISIONS_KEY)?;
        }
        info!(persistable, "session history disk saving toggled");
        Ok(persistable)
    }

    /// Flips automatic optimization. Returns the new setting.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn toggle_auto_optimize(&self) -> CoreResult<bool> {
        let auto_optimize = {
            let mut state = self.state.lock();
            state.auto_optimize = !state.auto_optimize;
            state.auto_optimize
        };
        self.storage
            .set_value(OPTIMIZE_KEY, Value::Bool(auto_optimize), ValueMode::Default)?;
        Ok(auto_optimize)
    }

    /// Sets the entry count above which an item's history is optimized.
    pub fn set_session_item_revision_threshold(&self, threshold: usize) {
        self.state.lock().session.set_item_revision_threshold(threshold);
    }

    /// When the pending save is due, if one is pending.
    pub fn pending_flush_deadline(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.state.lock().flush.deadline()
    }

    /// Saves session history if the debounce window has elapsed.
    /// Returns true if a save happened.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn flush_if_due(&self) -> CoreResult<bool> {
        let due = self.state.lock().flush.take_if_due(self.clock.now());
        if due {
            self.save_to_disk()?;
        }
        Ok(due)
    }

    /// Writes session history to storage values when disk saving is on.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or storage fails.
    pub fn save_to_disk(&self) -> CoreResult<()> {
        let snapshot = {
            let state = self.state.lock();
            if !state.persistable {
                return Ok(());
            }
            serde_json::to_value(&state.session)?
        };
        self.storage.set_value(REVISIONS_KEY, snapshot, ValueMode::Default)?;
        debug!("session history saved");
        Ok(())
    }
}

impl Drop for HistoryManager {
    fn drop(&mut self) {
        self.items.remove_observer(self.observer);
    }
}

impl std::fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryManager")
            .field("observer", &self.observer)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

fn record_change(
    state: &mut HistoryState,
    policies: &PolicyRegistry,
    change: &ItemsChange,
    now: chrono::DateTime<chrono::Utc>,
) {
    if change.source == PayloadSource::LocalChanged {
        return;
    }
    let mut recorded = false;
    for item in change.changed_or_inserted().chain(change.discarded.iter()) {
        if item.deleted() || item.error_decrypting() {
            continue;
        }
        let payload = item.payload().clone().with_source(PayloadSource::SessionHistory);
        let text_field = policies.history_text_field(item.content_type());
        if state.session.add_entry_for_payload(payload, text_field).is_none() {
            continue;
        }
        recorded = true;
        if state.auto_optimize {
            let removed = state.session.optimize_history_for_item(item.uuid());
            if removed > 0 {
                debug!(uuid = %item.uuid(), removed, "optimized session history");
            }
        }
    }
    if recorded && state.persistable {
        state.flush.schedule(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::history::ItemHistoryEntry;
    use chrono::{Duration, Utc};
    use notevault_model::{ContentType, ItemContent, MutationType, Payload};
    use notevault_storage::{InMemoryStorage, LocalStorage};
    use notevault_sync_protocol::{MockTransport, RevisionSummary, ServerPayload};
    use notevault_protocol::{EncryptionIntent, KeyParams, ProtocolVersion};

    struct Harness {
        items: Arc<ItemManager>,
        clock: Arc<ManualClock>,
        storage: Arc<StorageService>,
        protocol: Arc<ProtocolService>,
        history: HistoryManager,
    }

    fn harness(config: HistoryConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let items = Arc::new(ItemManager::default().with_clock(clock.clone()));
        let backend: Arc<dyn LocalStorage> = Arc::new(InMemoryStorage::new());
        let protocol = Arc::new(ProtocolService::new());
        let storage = Arc::new(StorageService::new(backend, Arc::clone(&protocol)));
        let history = HistoryManager::new(
            Arc::clone(&items),
            Arc::clone(&storage),
            Arc::clone(&protocol),
            config,
        );
        Harness {
            items,
            clock,
            storage,
            protocol,
            history,
        }
    }

    fn retrieve(items: &ItemManager, uuid: &str, text: &str) {
        let payload = Payload::with_uuid(uuid, ContentType::Note, ItemContent::with_title_and_text("t", text));
        items
            .emit_items_from_payloads(vec![payload], PayloadSource::RemoteRetrieved)
            .unwrap();
    }

    #[test]
    fn records_retrieved_changes_only() {
        let h = harness(HistoryConfig::default());
        retrieve(&h.items, "n", "one");
        retrieve(&h.items, "n", "two");
        h.items
            .change_item("n", |m| m.set_text("local"), MutationType::UserInteraction)
            .unwrap();

        assert_eq!(h.history.session_history_for_item("n").len(), 2);
    }

    #[test]
    fn untracked_types_are_ignored() {
        let h = harness(HistoryConfig::default());
        let tag = Payload::new(ContentType::Tag, ItemContent::with_title_and_text("tag", ""));
        h.items
            .emit_items_from_payloads(vec![tag.clone()], PayloadSource::RemoteRetrieved)
            .unwrap();
        assert!(h.history.session_history_for_item(&tag.uuid).is_empty());
    }

    #[test]
    fn tag_history_is_sized_by_title() {
        let h = harness(HistoryConfig::default().with_content_types(vec![ContentType::Note, ContentType::Tag]));
        for title in ["a", "ab", "abc", "a title long enough to be worth keeping"] {
            let tag = Payload::with_uuid("tag", ContentType::Tag, ItemContent::with_title_and_text(title, ""));
            h.items
                .emit_items_from_payloads(vec![tag], PayloadSource::RemoteRetrieved)
                .unwrap();
        }

        let history = h.history.session_history_for_item("tag");
        let deltas: Vec<i64> = history.entries().iter().map(ItemHistoryEntry::delta_size).collect();
        assert_eq!(deltas, vec![1, 1, 1, 36]);
    }

    #[test]
    fn saves_are_debounced() {
        let h = harness(HistoryConfig::default().with_persistable(true));
        retrieve(&h.items, "n", "one");
        let first_deadline = h.history.pending_flush_deadline().unwrap();

        h.clock.advance(Duration::seconds(1));
        retrieve(&h.items, "n", "two");
        assert!(h.history.pending_flush_deadline().unwrap() > first_deadline);

        h.clock.advance(Duration::seconds(1));
        assert!(!h.history.flush_if_due().unwrap());
        assert!(h.storage.get_value(REVISIONS_KEY, ValueMode::Default).is_none());

        h.clock.advance(Duration::seconds(1));
        assert!(h.history.flush_if_due().unwrap());
        assert!(h.storage.get_value(REVISIONS_KEY, ValueMode::Default).is_some());
        assert!(h.history.pending_flush_deadline().is_none());
    }

    #[test]
    fn nothing_scheduled_when_not_persistable() {
        let h = harness(HistoryConfig::default());
        retrieve(&h.items, "n", "one");
        assert!(h.history.pending_flush_deadline().is_none());
    }

    #[test]
    fn toggles_are_stored_and_reloaded() {
        let h = harness(HistoryConfig::default());
        retrieve(&h.items, "n", "one");
        assert!(h.history.toggle_disk_saving().unwrap());
        assert!(!h.history.toggle_auto_optimize().unwrap());
        assert!(h.storage.get_value(REVISIONS_KEY, ValueMode::Default).is_some());

        let reloaded = HistoryManager::new(
            Arc::clone(&h.items),
            Arc::clone(&h.storage),
            Arc::clone(&h.protocol),
            HistoryConfig::default(),
        );
        reloaded.initialize_from_disk().unwrap();
        assert!(reloaded.is_disk_enabled());
        assert!(!reloaded.is_auto_optimize_enabled());
        assert_eq!(reloaded.session_history_for_item("n").len(), 1);

        assert!(!h.history.toggle_disk_saving().unwrap());
        assert!(h.storage.get_value(REVISIONS_KEY, ValueMode::Default).is_none());
    }

    #[test]
    fn auto_optimize_bounds_growth() {
        let h = harness(HistoryConfig::default().with_revision_threshold(5));
        let mut text = String::new();
        for _ in 0..8 {
            text.push('x');
            retrieve(&h.items, "n", &text);
        }
        let history = h.history.session_history_for_item("n");
        assert!(history.len() <= 5);
        assert_eq!(
            history.latest().and_then(|e| e.payload().decrypted_content()).and_then(ItemContent::text),
            Some(text.as_str())
        );
    }

    #[test]
    fn clearing_history() {
        let h = harness(HistoryConfig::default().with_persistable(true));
        retrieve(&h.items, "a", "one");
        retrieve(&h.items, "b", "one");
        h.history.clear_history_for_item("a").unwrap();
        assert!(h.history.session_history_for_item("a").is_empty());
        assert_eq!(h.history.session_history_for_item("b").len(), 1);

        h.history.clear_all_history().unwrap();
        assert!(h.history.session_history_for_item("b").is_empty());
        assert!(h.storage.get_value(REVISIONS_KEY, ValueMode::Default).is_none());
    }

    #[test]
    fn fetches_server_history() {
        let h = harness(HistoryConfig::default());
        let params = KeyParams::generate("a@b.c", ProtocolVersion::V003).with_cost(1000);
        h.protocol.set_root_key(h.protocol.compute_root_key("pw", &params).unwrap());

        let transport = MockTransport::new();
        let now = Utc::now();
        for (i, text) in ["later", "earlier"].iter().enumerate() {
            let mut payload = Payload::with_uuid("n", ContentType::Note, ItemContent::with_title_and_text("t", *text));
            payload.updated_at = now - Duration::minutes(i64::try_from(i).unwrap());
            let encrypted = h.protocol.encrypt_payload(&payload, EncryptionIntent::Sync).unwrap();
            transport.add_revision(
                RevisionSummary {
                    uuid: format!("rev-{i}"),
                    item_uuid: "n".into(),
                    content_type: ContentType::Note,
                    created_at: payload.updated_at,
                    updated_at: payload.updated_at,
                },
                ServerPayload::from_payload(&encrypted).unwrap(),
            );
        }

        let server = h.history.fetch_server_history_for_item("n", &transport).unwrap();
        let texts: Vec<&str> = server
            .history()
            .entries()
            .iter()
            .filter_map(|e| e.payload().decrypted_content().and_then(ItemContent::text))
            .collect();
        assert_eq!(texts, vec!["earlier", "later"]);
    }
}
