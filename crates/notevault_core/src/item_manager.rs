//! The authoritative in-memory item index.
//!
//! Every change to an item goes through the manager: payloads from sync,
//! storage and import are mapped in with [`ItemManager::emit_items_from_payloads`],
//! local edits go through [`ItemManager::change_item`]. Observers are told
//! about each commit synchronously, after the index lock is released.
//!
//! # Thread Safety
//!
//! Mutation runs under a re-entrant gate. An observer may call back into
//! the manager (for example to resolve singletons) on the same thread; a
//! second thread waits until the outer mutation and its notifications
//! have finished.

use crate::clock::{Clock, SystemClock};
use crate::conflict::{duplicate_payload, ConflictDelta, ConflictResult, ImportDelta};
use crate::error::{CoreError, CoreResult};
use crate::observer::{ContentTypeFilter, ItemsChange, ObserverCallback, ObserverEntry, ObserverId};
use crate::reference_index::ReferenceIndex;
use chrono::{DateTime, Utc};
use notevault_model::{
    generate_uuid, ContentType, Item, ItemContent, ItemMutator, ModelError, MutationType, Payload,
    PayloadCollection, PayloadSource, PolicyRegistry, Predicate,
};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct IndexState {
    items: BTreeMap<String, Item>,
    references: ReferenceIndex,
}

/// Index of all items and gateway for their mutation.
pub struct ItemManager {
    state: RwLock<IndexState>,
    gate: ReentrantMutex<()>,
    observers: RwLock<Vec<ObserverEntry>>,
    next_observer_id: AtomicU64,
    policies: PolicyRegistry,
    clock: Arc<dyn Clock>,
}

impl ItemManager {
    /// Creates an empty manager using `policies`.
    pub fn new(policies: PolicyRegistry) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            gate: ReentrantMutex::new(()),
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            policies,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for dirty timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The capability registry.
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// The clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Current time according to the clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Registers an observer for items passing `filter`.
    pub fn add_observer<F>(&self, filter: ContentTypeFilter, callback: F) -> ObserverId
    where
        F: Fn(&ItemsChange) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::SeqCst));
        self.observers.write().push(ObserverEntry {
            id,
            filter,
            callback: Arc::new(callback),
        });
        id
    }

    /// Unregisters an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|entry| entry.id != id);
        observers.len() != before
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Finds an item by uuid.
    pub fn find_item(&self, uuid: &str) -> Option<Item> {
        self.state.read().items.get(uuid).cloned()
    }

    /// Finds several items, skipping unknown uuids.
    pub fn find_items(&self, uuids: &[String]) -> Vec<Item> {
        let state = self.state.read();
        uuids.iter().filter_map(|uuid| state.items.get(uuid).cloned()).collect()
    }

    /// Every item in the index, including deleted items awaiting sync.
    pub fn items(&self) -> Vec<Item> {
        self.state.read().items.values().cloned().collect()
    }

    /// Number of items in the index.
    pub fn item_count(&self) -> usize {
        self.state.read().items.len()
    }

    /// Non-deleted items of one content type.
    pub fn items_of_type(&self, content_type: &ContentType) -> Vec<Item> {
        self.state
            .read()
            .items
            .values()
            .filter(|item| item.content_type() == content_type && !item.deleted())
            .cloned()
            .collect()
    }

    /// Non-deleted items of `content_type` satisfying `predicate`.
    pub fn items_matching(&self, content_type: &ContentType, predicate: &Predicate) -> Vec<Item> {
        self.items_of_type(content_type)
            .into_iter()
            .filter(|item| item.satisfies_predicate(predicate))
            .collect()
    }

    /// Items with local changes not yet acknowledged by the server.
    pub fn dirty_items(&self) -> Vec<Item> {
        self.state
            .read()
            .items
            .values()
            .filter(|item| item.dirty())
            .cloned()
            .collect()
    }

    /// Items whose decryption failed.
    pub fn invalid_items(&self) -> Vec<Item> {
        self.state
            .read()
            .items
            .values()
            .filter(|item| item.error_decrypting())
            .cloned()
            .collect()
    }

    /// Items whose content references `uuid`.
    pub fn items_referencing_item(&self, uuid: &str) -> Vec<Item> {
        let state = self.state.read();
        state
            .references
            .referencing(uuid)
            .iter()
            .filter_map(|source| state.items.get(source).cloned())
            .collect()
    }

    /// Snapshot of all payloads.
    pub fn snapshot(&self, source: PayloadSource) -> PayloadCollection {
        let state = self.state.read();
        PayloadCollection::new(state.items.values().map(|item| item.payload().clone()), source)
    }

    // ------------------------------------------------------------------
    // Creation and mapping
    // ------------------------------------------------------------------

    /// Creates a new item. `needs_sync` marks it dirty.
    ///
    /// # Errors
    ///
    /// Returns an error if the generated uuid is already taken.
    pub fn create_item(
        &self,
        content_type: ContentType,
        content: ItemContent,
        needs_sync: bool,
    ) -> CoreResult<Item> {
        let mut payload = Payload::new(content_type, content);
        let now = self.now();
        payload.created_at = now;
        payload.updated_at = now;
        self.insert_item(payload, needs_sync)
    }

    /// Inserts a freshly built payload as a new item.
    ///
    /// # Errors
    ///
    /// Returns an error if an item with the same uuid already exists.
    pub fn insert_item(&self, payload: Payload, needs_sync: bool) -> CoreResult<Item> {
        let _gate = self.gate.lock();
        if self.state.read().items.contains_key(&payload.uuid) {
            return Err(CoreError::invalid_operation(format!(
                "item {} already exists",
                payload.uuid
            )));
        }
        let payload = if needs_sync {
            payload.with_dirty(self.now())
        } else {
            payload
        };
        let item = Item::new(payload.clone());
        self.commit(vec![payload], PayloadSource::Constructor);
        Ok(item)
    }

    /// Maps one payload into the index. See [`ItemManager::emit_items_from_payloads`].
    ///
    /// Returns the item now held under the payload's uuid, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if re-linking referencing items fails.
    pub fn emit_item_from_payload(
        &self,
        payload: Payload,
        source: PayloadSource,
    ) -> CoreResult<Option<Item>> {
        let uuid = payload.uuid.clone();
        self.emit_items_from_payloads(vec![payload], source)?;
        Ok(self.find_item(&uuid))
    }

    /// Maps payloads into the index.
    ///
    /// - Imported payloads are reconciled against a snapshot taken before
    ///   the batch ([`ImportDelta`]).
    /// - Retrieved payloads that collide with a dirty, differing local item
    ///   go through [`ConflictDelta`] with the local item on the left.
    /// - Everything else replaces the local version.
    ///
    /// Discardable payloads leave the index. Duplicates produced here are
    /// linked into every item that referenced the original.
    ///
    /// # Errors
    ///
    /// Returns an error if re-linking referencing items fails.
    pub fn emit_items_from_payloads(
        &self,
        payloads: Vec<Payload>,
        source: PayloadSource,
    ) -> CoreResult<Vec<Item>> {
        let _gate = self.gate.lock();
        let now = self.now();
        let mut resolved = Vec::with_capacity(payloads.len());
        let mut duplicates = Vec::new();

        {
            let state = self.state.read();
            let snapshot = (source == PayloadSource::FileImport).then(|| {
                PayloadCollection::new(
                    state.items.values().map(|item| item.payload().clone()),
                    PayloadSource::LocalRetrieved,
                )
            });

            for payload in payloads {
                let incoming = payload.with_source(source);
                if let Some(base) = &snapshot {
                    let applied = ImportDelta::new(base, &self.policies).resolve(&incoming, now);
                    for p in &applied {
                        if p.uuid != incoming.uuid && p.duplicate_of.as_deref() == Some(&incoming.uuid) {
                            duplicates.push((incoming.uuid.clone(), p.uuid.clone()));
                        }
                    }
                    resolved.extend(applied);
                    continue;
                }

                match state.items.get(&incoming.uuid) {
                    Some(local)
                        if source.is_retrieved()
                            && local.dirty()
                            && !self.policies.contents_equal(local.payload(), &incoming, false) =>
                    {
                        let result = ConflictDelta::new(local.payload(), &incoming, &self.policies).resolve(now);
                        debug!(
                            uuid = %incoming.uuid,
                            strategy = ?result.strategy,
                            "retrieved payload conflicts with local changes"
                        );
                        if let Some(duplicate) = &result.duplicate {
                            duplicates.push((incoming.uuid.clone(), duplicate.uuid.clone()));
                        }
                        resolved.extend(result.payloads());
                    }
                    _ => resolved.push(incoming),
                }
            }
        }

        let items = self.commit(resolved, source);
        self.relink_duplicates(&duplicates)?;
        Ok(items)
    }

    /// Commits already resolved conflicts.
    ///
    /// Primaries replace the items under their uuid. Duplicates are
    /// inserted and linked into every item that referenced the original.
    ///
    /// # Errors
    ///
    /// Returns an error if re-linking referencing items fails.
    pub fn emit_conflict_results(
        &self,
        results: Vec<ConflictResult>,
        source: PayloadSource,
    ) -> CoreResult<Vec<Item>> {
        let _gate = self.gate.lock();
        let mut payloads = Vec::with_capacity(results.len());
        let mut duplicates = Vec::new();
        for result in results {
            if let Some(duplicate) = &result.duplicate {
                duplicates.push((result.primary.uuid.clone(), duplicate.uuid.clone()));
            }
            payloads.extend(result.payloads());
        }
        let items = self.commit(payloads, source);
        self.relink_duplicates(&duplicates)?;
        Ok(items)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Applies `mutate` to one item and commits the result.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MutationOnUnknownUuid`] for unknown uuids and
    /// any error the mutator reports.
    pub fn change_item<F>(&self, uuid: &str, mutate: F, mutation_type: MutationType) -> CoreResult<Item>
    where
        F: FnOnce(&mut ItemMutator),
    {
        let _gate = self.gate.lock();
        let item = self
            .find_item(uuid)
            .ok_or_else(|| ModelError::unknown_uuid(uuid))?;
        let mut mutator = ItemMutator::new(&item, mutation_type);
        mutate(&mut mutator);
        let payload = mutator.finish(self.now())?;
        let changed = Item::new(payload.clone());
        self.commit(vec![payload], PayloadSource::LocalChanged);
        Ok(changed)
    }

    /// Applies `mutate` to several items and commits them together.
    ///
    /// Nothing is committed if any mutation fails.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MutationOnUnknownUuid`] for unknown uuids and
    /// any error a mutator reports.
    pub fn change_items<F>(&self, uuids: &[String], mutate: F, mutation_type: MutationType) -> CoreResult<Vec<Item>>
    where
        F: Fn(&mut ItemMutator),
    {
        self.change_items_with_source(uuids, mutate, mutation_type, PayloadSource::LocalChanged)
    }

    /// Like [`ItemManager::change_items`], tagging the commit with `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MutationOnUnknownUuid`] for unknown uuids and
    /// any error a mutator reports.
    pub fn change_items_with_source<F>(
        &self,
        uuids: &[String],
        mutate: F,
        mutation_type: MutationType,
        source: PayloadSource,
    ) -> CoreResult<Vec<Item>>
    where
        F: Fn(&mut ItemMutator),
    {
        if uuids.is_empty() {
            return Ok(Vec::new());
        }
        let _gate = self.gate.lock();
        let now = self.now();
        let mut payloads = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            let item = self
                .find_item(uuid)
                .ok_or_else(|| ModelError::unknown_uuid(uuid.as_str()))?;
            let mut mutator = ItemMutator::new(&item, mutation_type);
            mutate(&mut mutator);
            payloads.push(mutator.finish(now)?);
        }
        let changed = payloads.iter().cloned().map(Item::new).collect();
        self.commit(payloads, source);
        Ok(changed)
    }

    /// Clears dirty markers without touching content.
    ///
    /// Deleted items become discardable and leave the index.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown uuids.
    pub fn set_items_clean(&self, uuids: &[String], source: PayloadSource) -> CoreResult<Vec<Item>> {
        self.change_items_with_source(uuids, |m| m.clear_dirty(), MutationType::NonDirtying, source)
    }

    /// Copies an item under a new uuid and links the copy into every item
    /// that referenced the original.
    ///
    /// With `is_conflict`, the copy records the original in `duplicate_of`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown uuids.
    pub fn duplicate_item(&self, uuid: &str, is_conflict: bool) -> CoreResult<Item> {
        let _gate = self.gate.lock();
        let item = self
            .find_item(uuid)
            .ok_or_else(|| ModelError::unknown_uuid(uuid))?;
        let now = self.now();
        let duplicate = if is_conflict {
            duplicate_payload(item.payload(), uuid, now)
        } else {
            let mut copy = item.payload().clone().with_clean();
            copy.uuid = generate_uuid();
            copy.duplicate_of = None;
            copy.created_at = now;
            copy.updated_at = now;
            copy.with_dirty(now)
        };
        let duplicate_uuid = duplicate.uuid.clone();
        let created = Item::new(duplicate.clone());
        self.commit(vec![duplicate], PayloadSource::LocalChanged);
        self.relink_duplicates(&[(uuid.to_string(), duplicate_uuid)])?;
        Ok(self.find_item(created.uuid()).unwrap_or(created))
    }

    /// Moves an item to a fresh uuid.
    ///
    /// Used when the server reports that the uuid belongs to someone else.
    /// Referencing items are re-pointed and the old item is dropped locally.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown uuids.
    pub fn alternate_uuid_for_item(&self, uuid: &str) -> CoreResult<Item> {
        let _gate = self.gate.lock();
        let item = self
            .find_item(uuid)
            .ok_or_else(|| ModelError::unknown_uuid(uuid))?;

        let mut moved = item.payload().clone().with_clean();
        moved.uuid = generate_uuid();
        moved.last_sync_began = None;
        moved.last_sync_end = None;
        let moved = moved.with_dirty(self.now());
        let new_uuid = moved.uuid.clone();
        debug!(old = %uuid, new = %new_uuid, "alternating item uuid");

        self.commit(vec![moved], PayloadSource::ConflictUuid);

        let referencing: Vec<String> = self
            .items_referencing_item(uuid)
            .into_iter()
            .filter(|i| i.content().is_some() && i.uuid() != new_uuid)
            .map(|i| i.uuid().to_string())
            .collect();
        self.change_items(&referencing, |m| m.replace_reference(uuid, &new_uuid), MutationType::Internal)?;

        self.remove_item_locally(uuid);
        self.find_item(&new_uuid)
            .ok_or_else(|| CoreError::item_not_found(new_uuid))
    }

    /// Marks an item deleted and removes references to it.
    ///
    /// The tombstone stays in the index, dirty, until the deletion is synced.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown uuids.
    pub fn set_item_to_be_deleted(&self, uuid: &str) -> CoreResult<Item> {
        let _gate = self.gate.lock();
        let referencing: Vec<String> = self
            .items_referencing_item(uuid)
            .into_iter()
            .filter(|i| i.content().is_some() && i.uuid() != uuid)
            .map(|i| i.uuid().to_string())
            .collect();
        self.change_items(&referencing, |m| m.remove_item_as_relationship(uuid), MutationType::Internal)?;
        self.change_item(uuid, |m| m.set_deleted(), MutationType::Internal)
    }

    /// Drops an item from the index without syncing anything.
    pub fn remove_item_locally(&self, uuid: &str) -> Option<Item> {
        let _gate = self.gate.lock();
        let removed = {
            let mut state = self.state.write();
            let removed = state.items.remove(uuid);
            if removed.is_some() {
                state.references.remove(uuid);
            }
            removed
        };
        if let Some(item) = &removed {
            let mut change = ItemsChange::new(PayloadSource::LocalChanged);
            change.discarded.push(item.clone());
            self.notify(&change);
        }
        removed
    }

    /// Empties the index. Observers stay registered.
    pub fn reset(&self) {
        let _gate = self.gate.lock();
        let mut state = self.state.write();
        state.items.clear();
        state.references.clear();
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    fn commit(&self, payloads: Vec<Payload>, source: PayloadSource) -> Vec<Item> {
        let mut change = ItemsChange::new(source);
        let mut committed = Vec::with_capacity(payloads.len());
        {
            let mut state = self.state.write();
            for payload in payloads {
                let item = Item::new(payload.with_source(source));
                let uuid = item.uuid().to_string();
                if item.payload().discardable() {
                    if state.items.remove(&uuid).is_some() {
                        state.references.remove(&uuid);
                        change.discarded.push(item);
                    }
                    continue;
                }
                state.references.update(&item);
                if state.items.insert(uuid, item.clone()).is_some() {
                    change.changed.push(item.clone());
                } else {
                    change.inserted.push(item.clone());
                }
                committed.push(item);
            }
        }
        self.notify(&change);
        committed
    }

    fn notify(&self, change: &ItemsChange) {
        if change.is_empty() {
            return;
        }
        let observers: Vec<(ContentTypeFilter, ObserverCallback)> = self
            .observers
            .read()
            .iter()
            .map(|entry| (entry.filter.clone(), Arc::clone(&entry.callback)))
            .collect();
        for (filter, callback) in observers {
            let filtered = change.filtered(&filter);
            if !filtered.is_empty() {
                callback(&filtered);
            }
        }
    }

    fn relink_duplicates(&self, duplicates: &[(String, String)]) -> CoreResult<()> {
        for (original, duplicate_uuid) in duplicates {
            let Some(duplicate) = self.find_item(duplicate_uuid) else {
                continue;
            };
            let referencing: Vec<String> = self
                .items_referencing_item(original)
                .into_iter()
                .filter(|i| {
                    i.content().is_some()
                        && i.uuid() != duplicate_uuid.as_str()
                        && !i.is_referencing(duplicate_uuid)
                })
                .map(|i| i.uuid().to_string())
                .collect();
            self.change_items(
                &referencing,
                |m| m.add_item_as_relationship(&duplicate),
                MutationType::Internal,
            )?;
        }
        Ok(())
    }
}

impl Default for ItemManager {
    fn default() -> Self {
        Self::new(PolicyRegistry::standard())
    }
}

impl fmt::Debug for ItemManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemManager")
            .field("items", &self.item_count())
            .field("observers", &self.observer_count())
            .finish()
    }
}
