//! The sync coordinator.
//!
//! One sync operation runs as a sequence of rounds. Each round:
//!
//! 1. cuts a batch of dirty items (items keys first, newest edits next),
//!    saves it locally and stamps `last_sync_began`
//! 2. encrypts the batch and sends it with the current tokens
//! 3. maps saved, retrieved and conflicting items into the item graph
//! 4. persists every touched payload, then advances the tokens
//!
//! Rounds repeat while the server has more pages, or while dirty items
//! remain and the last round made progress.

use crate::config::SyncConfig;
use crate::downloader::AccountDownloader;
use crate::error::{SyncError, SyncResult};
use crate::events::{SyncEvent, SyncEventFeed};
use crate::state::{SyncState, SyncStateMachine};
use chrono::{DateTime, Utc};
use notevault_core::{
    ConflictDelta, ConflictResult, ItemManager, ItemsKeyManager, Origin, StorageService, ValueMode,
};
use notevault_model::{ContentType, Item, MutationType, Payload, PayloadSource};
use notevault_protocol::{EncryptionIntent, ProtocolService};
use notevault_sync_protocol::{
    ConflictType, ServerPayload, SyncRequest, SyncResponse, SyncTransport,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Storage value holding the sync token.
pub const SYNC_TOKEN_KEY: &str = "syncToken";
/// Storage value holding the cursor token of an interrupted download.
pub const CURSOR_TOKEN_KEY: &str = "cursorToken";

/// Totals of one sync operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Rounds sent to the server.
    pub rounds: usize,
    /// Items uploaded.
    pub uploaded: usize,
    /// Items the server acknowledged.
    pub saved: usize,
    /// Items retrieved.
    pub retrieved: usize,
    /// Conflicts handled.
    pub conflicts: usize,
    /// True if the operation stopped at the round bound.
    pub round_limit_reached: bool,
    /// True if dirty items were only saved locally.
    pub offline: bool,
    /// True if another operation was running and this request was folded
    /// into it.
    pub queued: bool,
}

impl SyncOutcome {
    fn absorb(&mut self, other: SyncOutcome) {
        self.rounds += other.rounds;
        self.uploaded += other.uploaded;
        self.saved += other.saved;
        self.retrieved += other.retrieved;
        self.conflicts += other.conflicts;
        self.round_limit_reached |= other.round_limit_reached;
        self.offline |= other.offline;
    }
}

#[derive(Debug, Default)]
struct RoundOutcome {
    saved: usize,
    retrieved: usize,
    conflicts: usize,
}

impl RoundOutcome {
    fn made_progress(&self) -> bool {
        self.saved > 0 || self.conflicts > 0
    }
}

/// Fate of a retrieved payload that collides with local state.
enum Collision {
    /// The local item stays as it is.
    Keep,
    /// The remote payload is mapped as usual.
    Apply(Payload),
    /// Both versions were reconciled.
    Resolved(ConflictResult),
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives sync between the item graph, local storage and the server.
///
/// # Thread Safety
///
/// All methods take `&self`. A `sync` call made while another is running
/// returns immediately and makes the running one do one more pass.
pub struct SyncCoordinator {
    config: SyncConfig,
    items: Arc<ItemManager>,
    protocol: Arc<ProtocolService>,
    storage: Arc<StorageService>,
    transport: RwLock<Option<Arc<dyn SyncTransport>>>,
    items_keys: ItemsKeyManager,
    machine: SyncStateMachine,
    events: SyncEventFeed,
    in_flight: AtomicBool,
    queued: AtomicBool,
    signed_out: AtomicBool,
    out_of_sync: AtomicBool,
}

impl SyncCoordinator {
    /// Creates a coordinator without a transport.
    ///
    /// Until one is set, every sync is an offline sync.
    pub fn new(
        config: SyncConfig,
        items: Arc<ItemManager>,
        protocol: Arc<ProtocolService>,
        storage: Arc<StorageService>,
    ) -> Self {
        let items_keys = ItemsKeyManager::new(Arc::clone(&items), Arc::clone(&protocol));
        Self {
            config,
            items,
            protocol,
            storage,
            transport: RwLock::new(None),
            items_keys,
            machine: SyncStateMachine::new(),
            events: SyncEventFeed::new(),
            in_flight: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            signed_out: AtomicBool::new(false),
            out_of_sync: AtomicBool::new(false),
        }
    }

    /// Sets the transport.
    pub fn with_transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        *self.transport.get_mut() = Some(transport);
        self
    }

    /// Replaces the transport. `None` switches to offline sync.
    pub fn set_transport(&self, transport: Option<Arc<dyn SyncTransport>>) {
        if transport.is_some() {
            self.signed_out.store(false, Ordering::SeqCst);
        }
        *self.transport.write() = transport;
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The items key bookkeeping this coordinator keeps in step with the ring.
    pub fn items_keys(&self) -> &ItemsKeyManager {
        &self.items_keys
    }

    /// The current state.
    pub fn state(&self) -> SyncState {
        self.machine.state()
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Recent events, oldest first.
    pub fn event_history(&self) -> Vec<SyncEvent> {
        self.events.history()
    }

    /// True between entering and leaving out-of-sync resolution.
    pub fn is_out_of_sync(&self) -> bool {
        self.out_of_sync.load(Ordering::SeqCst)
    }

    /// Position after the last completed round.
    pub fn sync_token(&self) -> Option<String> {
        self.token(SYNC_TOKEN_KEY)
    }

    /// Position inside an unfinished paginated download.
    pub fn cursor_token(&self) -> Option<String> {
        self.token(CURSOR_TOKEN_KEY)
    }

    fn token(&self, key: &str) -> Option<String> {
        match self.storage.get_value(key, ValueMode::Default) {
            Some(Value::String(token)) => Some(token),
            _ => None,
        }
    }

    fn store_token(&self, key: &str, token: Option<String>) -> SyncResult<()> {
        match token {
            Some(token) => self.storage.set_value(key, Value::String(token), ValueMode::Default)?,
            None => self.storage.remove_value(key)?,
        }
        Ok(())
    }

    fn transport(&self) -> Option<Arc<dyn SyncTransport>> {
        self.transport.read().clone()
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Runs one sync operation.
    ///
    /// Without a transport, dirty items are saved locally and marked clean.
    ///
    /// # Errors
    ///
    /// Returns the first failing round's error. Dirty items stay dirty and
    /// the tokens keep their last committed value.
    pub fn sync(&self) -> SyncResult<SyncOutcome> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.queued.store(true, Ordering::SeqCst);
            debug!("sync already running, queued another pass");
            return Ok(SyncOutcome {
                queued: true,
                ..SyncOutcome::default()
            });
        }
        let _guard = InFlight(&self.in_flight);

        let mut total = SyncOutcome::default();
        loop {
            self.queued.store(false, Ordering::SeqCst);
            let outcome = match self.transport() {
                Some(transport) => self.sync_online(transport.as_ref())?,
                None => self.sync_offline()?,
            };
            total.absorb(outcome);
            if !self.queued.load(Ordering::SeqCst) || self.signed_out.load(Ordering::SeqCst) {
                break;
            }
            debug!("running queued sync pass");
        }
        Ok(total)
    }

    fn sync_offline(&self) -> SyncResult<SyncOutcome> {
        let dirty: Vec<String> = self
            .items
            .dirty_items()
            .iter()
            .map(|item| item.uuid().to_string())
            .collect();
        let now = self.items.now();
        self.items.change_items_with_source(
            &dirty,
            |m| {
                m.set_updated_at(now);
                m.clear_dirty();
            },
            MutationType::NonDirtying,
            PayloadSource::LocalSaved,
        )?;
        self.persist(dirty.iter().cloned())?;
        debug!(saved = dirty.len(), "synced offline");
        self.events.emit(SyncEvent::SyncedOffline { saved: dirty.len() });
        Ok(SyncOutcome {
            saved: dirty.len(),
            offline: true,
            ..SyncOutcome::default()
        })
    }

    fn sync_online(&self, transport: &dyn SyncTransport) -> SyncResult<SyncOutcome> {
        match self.run_rounds(transport) {
            Ok(outcome) => {
                self.machine.reset();
                info!(
                    rounds = outcome.rounds,
                    saved = outcome.saved,
                    retrieved = outcome.retrieved,
                    conflicts = outcome.conflicts,
                    "sync completed"
                );
                self.events.emit(SyncEvent::SyncCompleted {
                    retrieved: outcome.retrieved,
                    saved: outcome.saved,
                    conflicts: outcome.conflicts,
                });
                if outcome.retrieved + outcome.saved >= self.config.major_change_threshold {
                    self.events.emit(SyncEvent::MajorDataChange);
                }
                Ok(outcome)
            }
            Err(err) => {
                self.machine.reset();
                self.handle_failure(&err);
                Err(err)
            }
        }
    }

    fn handle_failure(&self, err: &SyncError) {
        warn!(error = %err, "sync failed");
        let pending: Vec<Payload> = self
            .items
            .dirty_items()
            .iter()
            .map(|item| item.payload().clone())
            .collect();
        if let Err(save_err) = self.storage.save_payloads(&pending) {
            warn!(error = %save_err, "pending items could not be saved locally");
        }
        let event = match err {
            SyncError::SessionInvalid(_) => SyncEvent::SessionInvalid,
            SyncError::ConnectivityFailure(_) => SyncEvent::ConnectivityFailure,
            other => SyncEvent::SyncError {
                message: other.to_string(),
            },
        };
        self.events.emit(event);
    }

    fn run_rounds(&self, transport: &dyn SyncTransport) -> SyncResult<SyncOutcome> {
        self.machine.transition(SyncState::Preparing)?;
        let mut outcome = SyncOutcome::default();
        let mut saved_this_op: HashMap<String, DateTime<Utc>> = HashMap::new();

        loop {
            let batch = self.prepare_batch()?;
            self.machine.transition(SyncState::Uploading)?;
            let request = self.build_request(&batch)?;
            debug!(
                round = outcome.rounds + 1,
                upload = batch.len(),
                cursor = request.cursor_token.is_some(),
                "sync round"
            );

            self.machine.transition(SyncState::AwaitingResponse)?;
            let response = transport.sync(&request)?;
            if let Some(error) = response.error.clone() {
                return Err(SyncError::from_response(error));
            }

            self.machine.transition(SyncState::Reconciling)?;
            let round = self.reconcile(&response, &mut saved_this_op)?;
            outcome.rounds += 1;
            outcome.uploaded += batch.len();
            outcome.saved += round.saved;
            outcome.retrieved += round.retrieved;
            outcome.conflicts += round.conflicts;

            if self.signed_out.load(Ordering::SeqCst) {
                debug!("signed out during sync, dropping remaining rounds");
                break;
            }
            self.store_token(SYNC_TOKEN_KEY, response.sync_token.clone())?;
            self.store_token(CURSOR_TOKEN_KEY, response.cursor_token.clone())?;

            let more_data = response.cursor_token.is_some();
            let more_dirty = round.made_progress() && !self.uploadable_items().is_empty();
            if !more_data && !more_dirty {
                break;
            }
            if outcome.rounds >= self.config.max_rounds {
                warn!(rounds = outcome.rounds, "sync stopped at round bound");
                outcome.round_limit_reached = true;
                break;
            }
            let next = if round.conflicts > 0 {
                SyncState::ConflictsPending
            } else {
                SyncState::MoreDataPending
            };
            self.machine.transition(next)?;
        }
        Ok(outcome)
    }

    /// Dirty items that can be encrypted for upload.
    fn uploadable_items(&self) -> Vec<Item> {
        self.items
            .dirty_items()
            .into_iter()
            .filter(|item| !item.error_decrypting())
            .collect()
    }

    fn prepare_batch(&self) -> SyncResult<Vec<Payload>> {
        let mut dirty = self.uploadable_items();
        dirty.sort_by(|a, b| {
            let a_key = (is_items_key(a), a.payload().dirtied_date);
            let b_key = (is_items_key(b), b.payload().dirtied_date);
            b_key.cmp(&a_key)
        });
        dirty.truncate(self.config.upload_limit);
        if dirty.is_empty() {
            return Ok(Vec::new());
        }

        let payloads: Vec<Payload> = dirty.iter().map(|item| item.payload().clone()).collect();
        self.storage.save_payloads(&payloads)?;

        let uuids: Vec<String> = dirty.iter().map(|item| item.uuid().to_string()).collect();
        let now = self.items.now();
        let marked = self.items.change_items_with_source(
            &uuids,
            |m| m.set_last_sync_began(now),
            MutationType::NonDirtying,
            PayloadSource::SavedOrSaving,
        )?;
        Ok(marked.into_iter().map(|item| item.payload().clone()).collect())
    }

    fn build_request(&self, batch: &[Payload]) -> SyncResult<SyncRequest> {
        let mut items = Vec::with_capacity(batch.len());
        for payload in batch {
            let encrypted = self.protocol.encrypt_payload(payload, EncryptionIntent::Sync)?;
            items.push(ServerPayload::from_payload(&encrypted)?);
        }
        let mut request = SyncRequest::new(items, self.config.download_limit)
            .with_sync_token(self.sync_token())
            .with_cursor_token(self.cursor_token());
        request.api = self.config.api_version.clone();
        Ok(request)
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    fn reconcile(
        &self,
        response: &SyncResponse,
        saved_this_op: &mut HashMap<String, DateTime<Utc>>,
    ) -> SyncResult<RoundOutcome> {
        let now = self.items.now();
        let mut touched = BTreeSet::new();
        let mut round = RoundOutcome::default();

        let conflicted: HashSet<&str> = response
            .conflicts
            .iter()
            .filter_map(|c| c.server_item.as_ref().or(c.unsaved_item.as_ref()))
            .map(|item| item.uuid.as_str())
            .chain(response.unsaved.iter().map(|u| u.item.uuid.as_str()))
            .collect();

        for server in &response.saved_items {
            saved_this_op.insert(server.uuid.clone(), server.updated_at);
        }

        // Retrieved items, minus echoes of our own saves.
        let retrieved: Vec<Payload> = response
            .retrieved_items
            .iter()
            .filter(|item| !conflicted.contains(item.uuid.as_str()))
            .filter(|item| saved_this_op.get(&item.uuid) != Some(&item.updated_at))
            .map(|item| item.to_payload(PayloadSource::RemoteRetrieved))
            .collect();
        round.retrieved = retrieved.len();

        // Taken before saved items are cleaned below.
        let candidates: HashSet<String> = retrieved
            .iter()
            .filter(|remote| {
                saved_this_op.contains_key(&remote.uuid)
                    || self.items.find_item(&remote.uuid).is_some_and(|local| local.dirty())
            })
            .map(|remote| remote.uuid.clone())
            .collect();

        round.saved = self.apply_saved(&response.saved_items, now, &mut touched)?;

        let (keys, others): (Vec<Payload>, Vec<Payload>) = retrieved
            .into_iter()
            .partition(|p| p.content_type == ContentType::ItemsKey);
        for group in [keys, others] {
            if group.is_empty() {
                continue;
            }
            let mut plain = Vec::new();
            let mut results = Vec::new();
            for remote in self.decrypt(&group) {
                touched.insert(remote.uuid.clone());
                if !candidates.contains(&remote.uuid) {
                    plain.push(remote);
                    continue;
                }
                match self.resolve_retrieved_collision(remote, saved_this_op, now) {
                    Collision::Keep => {}
                    Collision::Apply(remote) => plain.push(remote),
                    Collision::Resolved(result) => results.push(result),
                }
            }
            round.conflicts += results.len();
            let mapped = self
                .items
                .emit_items_from_payloads(plain, PayloadSource::RemoteRetrieved)?;
            touched.extend(mapped.iter().map(|item| item.uuid().to_string()));
            let committed = self
                .items
                .emit_conflict_results(results, PayloadSource::RemoteConflict)?;
            touched.extend(committed.iter().map(|item| item.uuid().to_string()));
        }

        round.conflicts += self.apply_conflicts(response, now, &mut touched)?;

        self.persist(touched)?;
        debug!(
            saved = round.saved,
            retrieved = round.retrieved,
            conflicts = round.conflicts,
            "round reconciled"
        );
        Ok(round)
    }

    /// Decides what a retrieved payload does to a local item it collides
    /// with: one saved earlier in this operation, or one still dirty.
    ///
    /// Differing content keeps the local item and duplicates the remote
    /// one. A local item the server already holds keeps the newer save
    /// time.
    fn resolve_retrieved_collision(
        &self,
        remote: Payload,
        saved_this_op: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Collision {
        let saved_at = saved_this_op.get(&remote.uuid).copied();
        let Some(local) = self.items.find_item(&remote.uuid) else {
            return Collision::Apply(remote);
        };
        let policies = self.items.policies();
        if remote.error_decrypting || policies.contents_equal(local.payload(), &remote, false) {
            // A saved local copy is newer than a stale equal or unreadable one.
            return match saved_at {
                Some(_) => Collision::Keep,
                None => Collision::Apply(remote),
            };
        }

        let local_origin = if local.dirty() { Origin::Local } else { Origin::Remote };
        let mut result = ConflictDelta::new(local.payload(), &remote, policies)
            .with_origins(local_origin, Origin::Remote)
            .resolve(now);
        if let Some(saved_at) = saved_at {
            if result.primary.updated_at < saved_at {
                result.primary.updated_at = saved_at;
            }
        }
        debug!(
            uuid = %remote.uuid,
            strategy = ?result.strategy,
            "retrieved item collides with local changes"
        );
        Collision::Resolved(result)
    }

    /// Merges server metadata into saved items.
    ///
    /// Items edited since the batch was cut keep their dirty flag.
    fn apply_saved(
        &self,
        saved: &[ServerPayload],
        now: DateTime<Utc>,
        touched: &mut BTreeSet<String>,
    ) -> SyncResult<usize> {
        let mut payloads = Vec::with_capacity(saved.len());
        for server in saved {
            let Some(local) = self.items.find_item(&server.uuid) else {
                continue;
            };
            let server = server.to_payload(PayloadSource::RemoteSaved);
            let mut merged = local.payload().clone().merged_with_server_metadata(&server);
            merged.last_sync_end = Some(now);
            if merged.dirty_count == 0 {
                merged = merged.with_clean();
            }
            touched.insert(merged.uuid.clone());
            payloads.push(merged);
        }
        let count = payloads.len();
        self.items
            .emit_items_from_payloads(payloads, PayloadSource::RemoteSaved)?;
        Ok(count)
    }

    fn apply_conflicts(
        &self,
        response: &SyncResponse,
        now: DateTime<Utc>,
        touched: &mut BTreeSet<String>,
    ) -> SyncResult<usize> {
        let mut count = 0;
        let mut adopted = Vec::new();
        let mut results = Vec::new();

        for entry in &response.conflicts {
            match entry.kind {
                ConflictType::UuidConflict => {
                    let Some(unsaved) = &entry.unsaved_item else {
                        continue;
                    };
                    if let Some(uuid) = self.alternate(&unsaved.uuid, touched)? {
                        debug!(old = %unsaved.uuid, new = %uuid, "uuid conflict resolved");
                        count += 1;
                    }
                }
                ConflictType::SyncConflict => {
                    let Some(server_item) = &entry.server_item else {
                        continue;
                    };
                    let server = self.decrypt(&[server_item.to_payload(PayloadSource::RemoteRetrieved)]);
                    let Some(server) = server.into_iter().next() else {
                        continue;
                    };
                    touched.insert(server.uuid.clone());
                    count += 1;
                    match self.items.find_item(&server.uuid) {
                        None => adopted.push(server),
                        Some(local)
                            if !server.error_decrypting
                                && self.items.policies().contents_equal(local.payload(), &server, false) =>
                        {
                            let mut merged = local.payload().clone().merged_with_server_metadata(&server);
                            if merged.dirty_count == 0 {
                                merged = merged.with_clean();
                            }
                            adopted.push(merged);
                        }
                        Some(local) => {
                            let result = ConflictDelta::new(&server, local.payload(), self.items.policies())
                                .with_origins(Origin::Remote, Origin::Local)
                                .resolve(now);
                            debug!(uuid = %server.uuid, strategy = ?result.strategy, "sync conflict");
                            results.push(result);
                        }
                    }
                }
            }
        }

        for entry in &response.unsaved {
            if entry.error.tag.as_deref() == Some("uuid_conflict") {
                if self.alternate(&entry.item.uuid, touched)?.is_some() {
                    count += 1;
                }
            } else {
                warn!(
                    uuid = %entry.item.uuid,
                    tag = ?entry.error.tag,
                    "item rejected by server, leaving it dirty"
                );
            }
        }

        self.items
            .emit_items_from_payloads(adopted, PayloadSource::RemoteConflict)?;
        let committed = self
            .items
            .emit_conflict_results(results, PayloadSource::RemoteConflict)?;
        touched.extend(committed.iter().map(|item| item.uuid().to_string()));
        Ok(count)
    }

    fn alternate(&self, uuid: &str, touched: &mut BTreeSet<String>) -> SyncResult<Option<String>> {
        if self.items.find_item(uuid).is_none() {
            return Ok(None);
        }
        let moved = self.items.alternate_uuid_for_item(uuid)?;
        touched.insert(uuid.to_string());
        touched.insert(moved.uuid().to_string());
        touched.extend(
            self.items
                .items_referencing_item(moved.uuid())
                .iter()
                .map(|item| item.uuid().to_string()),
        );
        Ok(Some(moved.uuid().to_string()))
    }

    fn decrypt(&self, payloads: &[Payload]) -> Vec<Payload> {
        let batch = self.protocol.decrypt_payloads(payloads);
        if batch.error_count() > 0 {
            debug!(errors = batch.error_count(), "some payloads could not be decrypted");
        }
        batch.payloads
    }

    /// Writes the current state of each uuid to local storage.
    ///
    /// Uuids no longer indexed are removed from storage.
    fn persist(&self, uuids: impl IntoIterator<Item = String>) -> SyncResult<()> {
        let mut payloads = Vec::new();
        for uuid in uuids {
            match self.items.find_item(&uuid) {
                Some(item) => payloads.push(item.payload().clone()),
                None => self.storage.delete_payload_with_id(&uuid)?,
            }
        }
        self.storage.save_payloads(&payloads)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Local data
    // ------------------------------------------------------------------

    /// Decrypts stored payloads and maps them into the item graph.
    ///
    /// Items keys are mapped before anything else so the items they wrap
    /// can be read. Returns the number of payloads loaded.
    ///
    /// # Errors
    ///
    /// Returns storage failures.
    pub fn load_local_items(&self) -> SyncResult<usize> {
        let stored = self.storage.get_all_raw_payloads()?;
        let (keys, others): (Vec<Payload>, Vec<Payload>) = stored
            .into_iter()
            .partition(|p| p.content_type == ContentType::ItemsKey);

        let mut flagged = Vec::new();
        let mut count = 0;
        for group in [keys, others] {
            let decrypted = self.decrypt(&group);
            count += decrypted.len();
            flagged.extend(
                decrypted
                    .iter()
                    .filter(|p| p.error_decrypting_value_changed)
                    .map(|p| p.uuid.clone()),
            );
            self.items
                .emit_items_from_payloads(decrypted, PayloadSource::LocalRetrieved)?;
        }
        if !flagged.is_empty() {
            self.persist(flagged)?;
        }

        debug!(count, "local items loaded");
        self.events.emit(SyncEvent::LocalDataLoaded { count });
        Ok(count)
    }

    /// Retries decryption of every errored item.
    ///
    /// Returns the number of items that now decrypt.
    ///
    /// # Errors
    ///
    /// Returns item graph failures.
    pub fn refresh_errored_items(&self) -> SyncResult<usize> {
        let (keys, others): (Vec<Payload>, Vec<Payload>) = self
            .items
            .invalid_items()
            .iter()
            .map(|item| item.payload().clone())
            .partition(|p| p.content_type == ContentType::ItemsKey);

        let mut fixed = 0;
        for group in [keys, others] {
            if group.is_empty() {
                continue;
            }
            let decrypted = self.decrypt(&group);
            fixed += decrypted.iter().filter(|p| !p.error_decrypting).count();
            self.items
                .emit_items_from_payloads(decrypted, PayloadSource::LocalRetrieved)?;
        }
        debug!(fixed, "errored items refreshed");
        Ok(fixed)
    }

    /// Marks every item dirty and saves it locally.
    ///
    /// With `alternate_uuids`, every item except items keys first moves to
    /// a fresh uuid. Used when local data is about to join an account.
    ///
    /// # Errors
    ///
    /// Returns item graph or storage failures.
    pub fn mark_all_items_dirty_and_save_offline(&self, alternate_uuids: bool) -> SyncResult<usize> {
        let mut moved = BTreeSet::new();
        if alternate_uuids {
            for item in self.items.items() {
                if !is_items_key(&item) {
                    self.alternate(item.uuid(), &mut moved)?;
                }
            }
        }
        let uuids: Vec<String> = self
            .items
            .items()
            .iter()
            .map(|item| item.uuid().to_string())
            .collect();
        self.items.change_items(&uuids, |_| {}, MutationType::Internal)?;
        self.persist(moved.into_iter().chain(uuids.iter().cloned()))?;
        debug!(count = uuids.len(), alternate_uuids, "all items marked dirty");
        Ok(uuids.len())
    }

    // ------------------------------------------------------------------
    // Account-wide operations
    // ------------------------------------------------------------------

    /// Downloads every item on the server without touching the sync tokens.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConnectivityFailure`] without a transport, and
    /// transport failures otherwise.
    pub fn download_all_items(&self) -> SyncResult<Vec<Payload>> {
        let transport = self
            .transport()
            .ok_or_else(|| SyncError::ConnectivityFailure("no transport configured".into()))?;
        AccountDownloader::new(transport, Arc::clone(&self.protocol), &self.config).run()
    }

    /// Reconciles the local graph with a full download of the account.
    ///
    /// Server items whose content differs from the local copy are kept
    /// side by side with it; everything else is mapped as retrieved. The
    /// resulting dirty items go up with the next sync.
    ///
    /// # Errors
    ///
    /// Returns download, item graph or storage failures.
    pub fn resolve_out_of_sync(&self) -> SyncResult<usize> {
        self.out_of_sync.store(true, Ordering::SeqCst);
        self.events.emit(SyncEvent::EnterOutOfSync);
        info!("resolving out-of-sync state");

        let downloaded = match self.download_all_items() {
            Ok(downloaded) => downloaded,
            Err(err) => {
                self.handle_failure(&err);
                return Err(err);
            }
        };

        let now = self.items.now();
        let mut plain = Vec::new();
        let mut results = Vec::new();
        let mut touched = BTreeSet::new();
        for remote in downloaded {
            touched.insert(remote.uuid.clone());
            match self.items.find_item(&remote.uuid) {
                Some(local)
                    if !remote.error_decrypting
                        && !self.items.policies().contents_equal(local.payload(), &remote, false) =>
                {
                    results.push(ConflictDelta::new(local.payload(), &remote, self.items.policies()).resolve(now));
                }
                _ => plain.push(remote),
            }
        }
        let differing = results.len();

        let (keys, others): (Vec<Payload>, Vec<Payload>) = plain
            .into_iter()
            .partition(|p| p.content_type == ContentType::ItemsKey);
        for group in [keys, others] {
            self.items
                .emit_items_from_payloads(group, PayloadSource::RemoteRetrieved)?;
        }
        let committed = self
            .items
            .emit_conflict_results(results, PayloadSource::RemoteConflict)?;
        touched.extend(committed.iter().map(|item| item.uuid().to_string()));
        self.persist(touched)?;

        self.out_of_sync.store(false, Ordering::SeqCst);
        self.events.emit(SyncEvent::ExitOutOfSync);
        info!(differing, "out-of-sync state resolved");
        Ok(differing)
    }

    /// Forgets the session: tokens, transport and any queued pass.
    ///
    /// A sync in flight finishes its current round and stops.
    ///
    /// # Errors
    ///
    /// Returns storage failures while clearing the tokens.
    pub fn handle_sign_out(&self) -> SyncResult<()> {
        self.signed_out.store(true, Ordering::SeqCst);
        self.queued.store(false, Ordering::SeqCst);
        *self.transport.write() = None;
        self.store_token(SYNC_TOKEN_KEY, None)?;
        self.store_token(CURSOR_TOKEN_KEY, None)?;
        if !self.in_flight.load(Ordering::SeqCst) {
            self.machine.reset();
        }
        debug!("sync state cleared for sign-out");
        Ok(())
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("config", &self.config)
            .field("state", &self.machine.state())
            .field("has_transport", &self.transport.read().is_some())
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}

fn is_items_key(item: &Item) -> bool {
    item.content_type() == &ContentType::ItemsKey
}
