//! Encrypted local persistence.
//!
//! The storage service sits between the item graph and a raw
//! [`LocalStorage`] backend. Payloads are encrypted on their way down
//! according to the encryption policy; simple key/values are kept in a
//! single values object:
//!
//! ```text
//! { "wrapped":    <EncryptedStorage payload, ciphertext of all default values>,
//!   "unwrapped":  { ...plaintext default values, only while no key is set... },
//!   "nonwrapped": { ...values that are never encrypted... } }
//! ```
//!
//! After a restart the wrapped blob stays sealed until
//! [`StorageService::decrypt_storage`] runs with the root key in place.

use crate::config::{EncryptionPolicy, PersistencePolicy, StoragePolicy};
use crate::error::CoreResult;
use notevault_model::{generate_uuid, ContentType, ItemContent, Payload, PayloadSource};
use notevault_protocol::{CryptoError, EncryptionIntent, ProtocolService, RootKey, WrappingKey};
use notevault_storage::{LocalStorage, RawPayload};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw value key the values object is stored under.
pub const STORAGE_VALUES_KEY: &str = "storage";

/// Persisted shape of the values object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageValues {
    /// Encrypted default values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped: Option<Payload>,
    /// Plaintext default values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unwrapped: Option<Map<String, Value>>,
    /// Values that are never encrypted.
    #[serde(default)]
    pub nonwrapped: Map<String, Value>,
}

/// How a value is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueMode {
    /// Encrypted whenever a root key is available.
    #[default]
    Default,
    /// Never encrypted. For flags needed before unlock.
    Nonwrapped,
}

#[derive(Default)]
struct ValuesState {
    unwrapped: Map<String, Value>,
    nonwrapped: Map<String, Value>,
    sealed: Option<Payload>,
}

/// Encrypts and persists payloads and values.
pub struct StorageService {
    storage: Arc<dyn LocalStorage>,
    protocol: Arc<ProtocolService>,
    values: RwLock<ValuesState>,
    policy: RwLock<StoragePolicy>,
}

impl StorageService {
    /// Creates a service over `storage`.
    pub fn new(storage: Arc<dyn LocalStorage>, protocol: Arc<ProtocolService>) -> Self {
        Self {
            storage,
            protocol,
            values: RwLock::new(ValuesState::default()),
            policy: RwLock::new(StoragePolicy::default()),
        }
    }

    /// Sets the initial policy.
    #[must_use]
    pub fn with_policy(self, policy: StoragePolicy) -> Self {
        *self.policy.write() = policy;
        self
    }

    /// Current policy.
    pub fn policy(&self) -> StoragePolicy {
        *self.policy.read()
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Loads the values object from the backend.
    ///
    /// A wrapped blob stays sealed until [`StorageService::decrypt_storage`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the object is corrupted.
    pub fn initialize_values(&self) -> CoreResult<()> {
        let Some(raw) = self.storage.get_raw_value(STORAGE_VALUES_KEY)? else {
            return Ok(());
        };
        let persisted: StorageValues = serde_json::from_str(&raw)?;
        let mut state = self.values.write();
        state.nonwrapped = persisted.nonwrapped;
        state.unwrapped = persisted.unwrapped.unwrap_or_default();
        state.sealed = persisted.wrapped;
        Ok(())
    }

    /// True while a wrapped blob has not been decrypted.
    pub fn is_sealed(&self) -> bool {
        self.values.read().sealed.is_some()
    }

    /// Decrypts the wrapped blob with the root key and merges its values.
    ///
    /// Values set while sealed take precedence over wrapped ones.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::AuthenticationFailure`] if the blob cannot be
    /// decrypted with the current key.
    pub fn decrypt_storage(&self) -> CoreResult<()> {
        let Some(sealed) = self.values.read().sealed.clone() else {
            return Ok(());
        };
        let decrypted = self.protocol.decrypt_payload(&sealed)?;
        let Some(content) = decrypted.decrypted_content().filter(|_| !decrypted.error_decrypting) else {
            return Err(CryptoError::authentication("storage values cannot be decrypted").into());
        };

        let mut state = self.values.write();
        let mut merged = content.fields.clone();
        for (key, value) in std::mem::take(&mut state.unwrapped) {
            merged.insert(key, value);
        }
        state.unwrapped = merged;
        state.sealed = None;
        debug!(values = state.unwrapped.len(), "storage values decrypted");
        Ok(())
    }

    /// True if `key` can open the persisted wrapped blob. Also true when
    /// there is nothing wrapped.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is structurally invalid.
    pub fn can_decrypt_with_key(&self, key: &RootKey) -> CoreResult<bool> {
        let wrapped = match self.values.read().sealed.clone() {
            Some(sealed) => Some(sealed),
            None => self
                .storage
                .get_raw_value(STORAGE_VALUES_KEY)?
                .map(|raw| serde_json::from_str::<StorageValues>(&raw))
                .transpose()?
                .and_then(|values| values.wrapped),
        };
        let Some(wrapped) = wrapped else {
            return Ok(true);
        };
        let decrypted = self
            .protocol
            .decrypt_payload_with_key(&wrapped, &WrappingKey::Root(key.clone()))?;
        Ok(!decrypted.error_decrypting)
    }

    /// Sets a value and re-persists the values object.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub fn set_value(&self, key: &str, value: Value, mode: ValueMode) -> CoreResult<()> {
        {
            let mut state = self.values.write();
            match mode {
                ValueMode::Default => state.unwrapped.insert(key.to_string(), value),
                ValueMode::Nonwrapped => state.nonwrapped.insert(key.to_string(), value),
            };
        }
        self.persist_values()
    }

    /// Reads a value.
    pub fn get_value(&self, key: &str, mode: ValueMode) -> Option<Value> {
        let state = self.values.read();
        match mode {
            ValueMode::Default => state.unwrapped.get(key).cloned(),
            ValueMode::Nonwrapped => state.nonwrapped.get(key).cloned(),
        }
    }

    /// Removes a value from every mode and re-persists.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub fn remove_value(&self, key: &str) -> CoreResult<()> {
        {
            let mut state = self.values.write();
            state.unwrapped.remove(key);
            state.nonwrapped.remove(key);
        }
        self.persist_values()
    }

    /// Forgets every value, in memory and on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn clear_values(&self) -> CoreResult<()> {
        *self.values.write() = ValuesState::default();
        self.storage.remove_raw_value(STORAGE_VALUES_KEY)?;
        Ok(())
    }

    /// Writes the values object, wrapping default values when possible.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the backend fails.
    pub fn persist_values(&self) -> CoreResult<()> {
        let policy = self.policy();
        if policy.persistence == PersistencePolicy::Ephemeral {
            return Ok(());
        }

        let persisted = {
            let state = self.values.read();
            let mut persisted = StorageValues {
                nonwrapped: state.nonwrapped.clone(),
                ..StorageValues::default()
            };
            let can_wrap = policy.encryption == EncryptionPolicy::Default && self.protocol.has_root_key();
            if let Some(sealed) = &state.sealed {
                persisted.wrapped = Some(sealed.clone());
                persisted.unwrapped = (!state.unwrapped.is_empty()).then(|| state.unwrapped.clone());
            } else if can_wrap {
                let content = ItemContent {
                    fields: state.unwrapped.clone(),
                    ..ItemContent::default()
                };
                let payload = Payload::with_uuid(generate_uuid(), ContentType::EncryptedStorage, content);
                persisted.wrapped = Some(
                    self.protocol
                        .encrypt_payload(&payload, EncryptionIntent::LocalStorageEncrypted)?,
                );
            } else {
                persisted.unwrapped = Some(state.unwrapped.clone());
            }
            persisted
        };

        let raw = serde_json::to_string(&persisted)?;
        self.storage.set_raw_value(STORAGE_VALUES_KEY, &raw)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Payloads
    // ------------------------------------------------------------------

    /// Persists payloads. Discardable ones are deleted instead.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the backend fails.
    pub fn save_payloads(&self, payloads: &[Payload]) -> CoreResult<()> {
        let policy = self.policy();
        if policy.persistence == PersistencePolicy::Ephemeral || payloads.is_empty() {
            return Ok(());
        }
        let intent = match policy.encryption {
            EncryptionPolicy::Default => EncryptionIntent::LocalStoragePreferEncrypted,
            EncryptionPolicy::Disabled => EncryptionIntent::LocalStorageDecrypted,
        };

        let mut records = Vec::with_capacity(payloads.len());
        let mut deleted = 0usize;
        for payload in payloads {
            if payload.discardable() {
                self.storage.remove_raw_payload_with_id(&payload.uuid)?;
                deleted += 1;
                continue;
            }
            let encrypted = self.protocol.encrypt_payload(payload, intent)?;
            records.push(RawPayload::new(encrypted.uuid.clone(), serde_json::to_value(&encrypted)?));
        }
        self.storage.save_raw_payloads(&records)?;
        debug!(saved = records.len(), deleted, "payloads persisted");
        Ok(())
    }

    /// Reads every stored payload. Unparseable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn get_all_raw_payloads(&self) -> CoreResult<Vec<Payload>> {
        let records = self.storage.get_all_raw_payloads()?;
        let mut payloads = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value::<Payload>(record.body) {
                Ok(payload) => payloads.push(payload.with_source(PayloadSource::LocalRetrieved)),
                Err(err) => warn!(uuid = %record.uuid, error = %err, "skipping unreadable stored payload"),
            }
        }
        Ok(payloads)
    }

    /// Deletes one stored payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn delete_payload_with_id(&self, uuid: &str) -> CoreResult<()> {
        self.storage.remove_raw_payload_with_id(uuid)?;
        Ok(())
    }

    /// Deletes every stored payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn clear_all_payloads(&self) -> CoreResult<()> {
        self.storage.remove_all_raw_payloads()?;
        Ok(())
    }

    /// Deletes all payloads and values.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn clear_all_data(&self) -> CoreResult<()> {
        self.clear_all_payloads()?;
        self.clear_values()?;
        self.storage.remove_all_raw_values()?;
        Ok(())
    }

    /// Changes the persistence policy. Ephemeral clears persisted data
    /// but keeps values in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn set_persistence_policy(&self, persistence: PersistencePolicy) -> CoreResult<()> {
        self.policy.write().persistence = persistence;
        match persistence {
            PersistencePolicy::Ephemeral => {
                self.storage.remove_all_raw_payloads()?;
                self.storage.remove_all_raw_values()?;
                Ok(())
            }
            PersistencePolicy::Default => self.persist_values(),
        }
    }

    /// Changes the encryption policy and rewrites the values object.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub fn set_encryption_policy(&self, encryption: EncryptionPolicy) -> CoreResult<()> {
        self.policy.write().encryption = encryption;
        self.persist_values()
    }

    /// Raw backend access for values outside the values object.
    pub fn backend(&self) -> &Arc<dyn LocalStorage> {
        &self.storage
    }
}

impl fmt::Debug for StorageService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageService")
            .field("policy", &self.policy())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
