//! Backup import.

use crate::error::{CoreError, CoreResult};
use crate::item_manager::ItemManager;
use notevault_model::{Content, ContentType, Item, Payload, PayloadSource};
use notevault_protocol::{ItemsKeyMaterial, KeyParams, ProtocolService, RootKey, WrappingKey};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of an import.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    /// Items inserted or changed by the import.
    pub affected_items: Vec<Item>,
    /// Payloads that could not be decrypted and were skipped.
    pub error_count: usize,
}

/// Imports backup payloads into the item graph.
#[derive(Debug)]
pub struct Importer {
    items: Arc<ItemManager>,
    protocol: Arc<ProtocolService>,
}

impl Importer {
    /// Creates an importer.
    pub fn new(items: Arc<ItemManager>, protocol: Arc<ProtocolService>) -> Self {
        Self { items, protocol }
    }

    /// Imports `payloads`.
    ///
    /// With `key_params` the backup is encrypted: the root key is derived
    /// from `password`, items keys are decrypted first, and every other
    /// payload is decrypted with the key it names. Without key params,
    /// encrypted payloads are decrypted with the account's own keys.
    ///
    /// Payloads that fail to decrypt are counted and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if key params are given without a password or the
    /// key derivation fails.
    pub fn import_data(
        &self,
        payloads: Vec<Payload>,
        password: Option<&str>,
        key_params: Option<&KeyParams>,
    ) -> CoreResult<ImportResult> {
        let root_key = match (password, key_params) {
            (Some(password), Some(params)) => Some(self.protocol.compute_root_key(password, params)?),
            (None, Some(_)) => {
                return Err(CoreError::invalid_operation("an encrypted backup needs a password"));
            }
            _ => None,
        };

        let (keys, others): (Vec<Payload>, Vec<Payload>) = payloads
            .into_iter()
            .partition(|p| p.content_type == ContentType::ItemsKey);

        let mut error_count = 0;
        let mut imported_keys: Vec<ItemsKeyMaterial> = Vec::new();
        let mut valid = Vec::new();
        let demote_defaults = self.protocol.default_items_key().is_some();

        for payload in &keys {
            let Some(mut decrypted) = self.decrypt(payload, root_key.as_ref(), &imported_keys) else {
                error_count += 1;
                continue;
            };
            if let Some(Content::Decrypted(content)) = &mut decrypted.content {
                if demote_defaults {
                    content.set(ItemsKeyMaterial::DEFAULT_FIELD, Value::Bool(false));
                }
                match ItemsKeyMaterial::from_content(decrypted.uuid.clone(), content) {
                    Ok(material) => imported_keys.push(material),
                    Err(err) => warn!(uuid = %decrypted.uuid, error = %err, "imported items key is invalid"),
                }
            }
            valid.push(decrypted);
        }

        for payload in &others {
            match self.decrypt(payload, root_key.as_ref(), &imported_keys) {
                Some(decrypted) => valid.push(decrypted),
                None => error_count += 1,
            }
        }

        let affected_items = self.items.emit_items_from_payloads(valid, PayloadSource::FileImport)?;
        info!(affected = affected_items.len(), errors = error_count, "backup imported");
        Ok(ImportResult {
            affected_items,
            error_count,
        })
    }

    fn decrypt(
        &self,
        payload: &Payload,
        root_key: Option<&RootKey>,
        imported_keys: &[ItemsKeyMaterial],
    ) -> Option<Payload> {
        if !payload.is_encrypted() {
            return payload.decrypted_content().is_some().then(|| payload.clone());
        }

        let key = match (root_key, &payload.items_key_id) {
            (_, Some(id)) => imported_keys
                .iter()
                .find(|k| k.uuid() == id)
                .cloned()
                .or_else(|| self.protocol.items_key(id))
                .map(WrappingKey::Items),
            (Some(root), None) => Some(WrappingKey::Root(root.clone())),
            (None, None) => None,
        };
        let result = match key {
            Some(key) => self.protocol.decrypt_payload_with_key(payload, &key),
            None => self.protocol.decrypt_payload(payload),
        };

        match result {
            Ok(decrypted) if !decrypted.error_decrypting => Some(decrypted),
            Ok(_) => {
                warn!(uuid = %payload.uuid, "imported payload cannot be decrypted");
                None
            }
            Err(err) => {
                warn!(uuid = %payload.uuid, error = %err, "imported payload is malformed");
                None
            }
        }
    }
}
