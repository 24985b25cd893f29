//! Items-key bookkeeping.
//!
//! Items keys are ordinary items of type ItemsKey. The protocol key ring is
//! derived from them: whenever an items key is mapped, changed or removed,
//! the ring is updated to match.

use crate::error::{CoreError, CoreResult};
use crate::item_manager::ItemManager;
use crate::observer::{ContentTypeFilter, ItemsChange, ObserverId};
use notevault_model::{generate_uuid, ContentType, Item, MutationType, Payload};
use notevault_protocol::{ItemsKeyMaterial, ProtocolService};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Keeps the protocol key ring in sync with ItemsKey items.
#[derive(Debug)]
pub struct ItemsKeyManager {
    items: Arc<ItemManager>,
    protocol: Arc<ProtocolService>,
    observer: ObserverId,
}

impl ItemsKeyManager {
    /// Attaches to `items` and loads any items keys already indexed.
    pub fn new(items: Arc<ItemManager>, protocol: Arc<ProtocolService>) -> Self {
        let ring = Arc::clone(&protocol);
        let observer = items.add_observer(ContentTypeFilter::only(ContentType::ItemsKey), move |change| {
            apply_change(&ring, change);
        });
        for item in items.items_of_type(&ContentType::ItemsKey) {
            register(&protocol, &item);
        }
        Self {
            items,
            protocol,
            observer,
        }
    }

    /// Live items keys.
    pub fn items_keys(&self) -> Vec<Item> {
        self.items
            .items_of_type(&ContentType::ItemsKey)
            .into_iter()
            .filter(|item| !item.error_decrypting())
            .collect()
    }

    /// The items key new content is encrypted under.
    pub fn default_items_key(&self) -> Option<Item> {
        self.items_keys()
            .into_iter()
            .filter(|item| is_default(item))
            .max_by_key(|item| item.created_at())
    }

    /// Creates a new items key under the root key and makes it the default.
    ///
    /// The previous default, if any, loses its default flag.
    ///
    /// # Errors
    ///
    /// Returns [`notevault_protocol::CryptoError::MissingKey`] if no root
    /// key is set.
    pub fn create_new_default_items_key(&self) -> CoreResult<Item> {
        let uuid = generate_uuid();
        let content = self.protocol.create_items_key_content(&uuid)?;

        let previous: Vec<String> = self
            .items_keys()
            .into_iter()
            .filter(|item| is_default(item))
            .map(|item| item.uuid().to_string())
            .collect();
        self.items.change_items(
            &previous,
            |m| m.set_field(ItemsKeyMaterial::DEFAULT_FIELD, Value::Bool(false)),
            MutationType::Internal,
        )?;

        let mut payload = Payload::with_uuid(uuid, ContentType::ItemsKey, content);
        let now = self.items.now();
        payload.created_at = now;
        payload.updated_at = now;
        let item = self.items.insert_item(payload, true)?;
        debug!(uuid = %item.uuid(), "created default items key");

        if self.protocol.items_key(item.uuid()).is_none() {
            return Err(CoreError::invalid_operation("new items key did not reach the key ring"));
        }
        Ok(item)
    }

    /// Re-reads every items key into the ring.
    pub fn reload(&self) {
        self.protocol.clear_items_keys();
        for item in self.items.items_of_type(&ContentType::ItemsKey) {
            register(&self.protocol, &item);
        }
    }
}

impl Drop for ItemsKeyManager {
    fn drop(&mut self) {
        self.items.remove_observer(self.observer);
    }
}

fn is_default(item: &Item) -> bool {
    item.content()
        .and_then(|c| c.get(ItemsKeyMaterial::DEFAULT_FIELD))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn register(protocol: &ProtocolService, item: &Item) {
    if item.deleted() {
        protocol.remove_items_key(item.uuid());
        return;
    }
    let Some(content) = item.content() else {
        return;
    };
    match ItemsKeyMaterial::from_content(item.uuid(), content) {
        Ok(material) => protocol.add_items_key(material),
        Err(err) => warn!(uuid = %item.uuid(), error = %err, "items key content is invalid"),
    }
}

fn apply_change(protocol: &ProtocolService, change: &ItemsChange) {
    for item in change.changed_or_inserted() {
        register(protocol, item);
    }
    for item in &change.discarded {
        protocol.remove_items_key(item.uuid());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notevault_model::PayloadSource;
    use notevault_protocol::ProtocolVersion;

    fn setup() -> (Arc<ItemManager>, Arc<ProtocolService>, ItemsKeyManager) {
        let items = Arc::new(ItemManager::default());
        let protocol = Arc::new(ProtocolService::new());
        let params = notevault_protocol::KeyParams::generate("a@b.c", ProtocolVersion::V004).with_cost(1000);
        let root = protocol.compute_root_key("password", &params).unwrap();
        protocol.set_root_key(root);
        let manager = ItemsKeyManager::new(Arc::clone(&items), Arc::clone(&protocol));
        (items, protocol, manager)
    }

    #[test]
    fn new_default_key_reaches_ring() {
        let (_items, protocol, manager) = setup();
        let key = manager.create_new_default_items_key().unwrap();

        assert!(key.dirty());
        assert_eq!(manager.default_items_key().unwrap().uuid(), key.uuid());
        assert_eq!(protocol.default_items_key().unwrap().uuid(), key.uuid());
    }

    #[test]
    fn rotating_clears_previous_default() {
        let (_items, protocol, manager) = setup();
        let first = manager.create_new_default_items_key().unwrap();
        let second = manager.create_new_default_items_key().unwrap();

        assert_eq!(manager.items_keys().len(), 2);
        assert_eq!(manager.default_items_key().unwrap().uuid(), second.uuid());
        assert!(!protocol.items_key(first.uuid()).unwrap().is_default());
        assert!(protocol.items_key(second.uuid()).unwrap().is_default());
    }

    #[test]
    fn removed_keys_leave_ring() {
        let (items, protocol, manager) = setup();
        let key = manager.create_new_default_items_key().unwrap();
        items.remove_item_locally(key.uuid());
        assert!(protocol.items_key(key.uuid()).is_none());
    }

    #[test]
    fn mapped_keys_join_ring() {
        let (items, protocol, _manager) = setup();
        let uuid = generate_uuid();
        let content = protocol.create_items_key_content(&uuid).unwrap();
        let payload = Payload::with_uuid(uuid.clone(), ContentType::ItemsKey, content);
        items
            .emit_items_from_payloads(vec![payload], PayloadSource::RemoteRetrieved)
            .unwrap();
        assert!(protocol.items_key(&uuid).is_some());
    }

    #[test]
    fn creating_without_root_key_fails() {
        let items = Arc::new(ItemManager::default());
        let protocol = Arc::new(ProtocolService::new());
        let manager = ItemsKeyManager::new(items, protocol);
        assert!(manager.create_new_default_items_key().is_err());
    }
}
