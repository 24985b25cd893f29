//! Key ownership and payload-level encryption.

use crate::error::{CryptoError, CryptoResult};
use crate::intent::EncryptionIntent;
use crate::key_params::KeyParams;
use crate::keys::{ItemsKeyMaterial, RootKey, WrappingKey};
use crate::operator::{EncryptedParameters, Operator};
use crate::version::ProtocolVersion;
use notevault_model::{Content, ContentType, ItemContent, Payload};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Result of decrypting a batch of payloads.
#[derive(Debug, Default)]
pub struct DecryptedBatch {
    /// One output payload per input, in input order. Failed payloads keep
    /// their ciphertext and carry `error_decrypting`.
    pub payloads: Vec<Payload>,
    /// Payloads that were malformed or of an unsupported version.
    pub fatal: Vec<(String, CryptoError)>,
}

impl DecryptedBatch {
    /// Number of payloads that failed to decrypt for any reason.
    pub fn error_count(&self) -> usize {
        self.payloads.iter().filter(|p| p.error_decrypting).count()
    }
}

/// Owns the root key and the items-key ring and encrypts payloads.
///
/// # Key selection
///
/// - Items keys and encrypted storage are wrapped by the root key.
/// - Everything else uses the default items key, falling back to the root
///   key for accounts on 003 or earlier.
///
/// # Thread Safety
///
/// Keys are held behind `RwLock`s; the service can be shared via `Arc`.
#[derive(Default)]
pub struct ProtocolService {
    root_key: RwLock<Option<RootKey>>,
    items_keys: RwLock<BTreeMap<String, ItemsKeyMaterial>>,
}

impl ProtocolService {
    /// Creates a service with no keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Version used for new accounts.
    pub fn latest_version(&self) -> ProtocolVersion {
        ProtocolVersion::latest()
    }

    /// Generates fresh key params and derives a root key from them.
    ///
    /// # Errors
    ///
    /// Returns an error if derivation fails.
    pub fn create_root_key(
        &self,
        identifier: &str,
        password: &str,
        version: ProtocolVersion,
    ) -> CryptoResult<RootKey> {
        let key_params = KeyParams::generate(identifier, version);
        key_params.validate()?;
        self.compute_root_key(password, &key_params)
    }

    /// Derives the root key for existing key params.
    ///
    /// # Errors
    ///
    /// Returns an error if the params lack fields their version needs.
    pub fn compute_root_key(&self, password: &str, key_params: &KeyParams) -> CryptoResult<RootKey> {
        debug!(version = %key_params.version, "deriving root key");
        Operator::for_version(key_params.version).derive_root_key(password, key_params)
    }

    /// Checks required fields and cost minimums.
    ///
    /// # Errors
    ///
    /// See [`KeyParams::validate`].
    pub fn validate_key_params(&self, key_params: &KeyParams) -> CryptoResult<()> {
        key_params.validate()
    }

    /// True if `password` derives the current root key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MissingKey`] if no root key is set.
    pub fn validate_account_password(&self, password: &str) -> CryptoResult<bool> {
        let root_key = self
            .root_key()
            .ok_or_else(|| CryptoError::MissingKey("no root key".into()))?;
        let candidate = self.compute_root_key(password, root_key.key_params())?;
        Ok(candidate.verify_server_password(root_key.server_password()))
    }

    /// Installs the root key.
    pub fn set_root_key(&self, key: RootKey) {
        *self.root_key.write() = Some(key);
    }

    /// Removes the root key.
    pub fn clear_root_key(&self) {
        *self.root_key.write() = None;
    }

    /// Returns a copy of the root key.
    pub fn root_key(&self) -> Option<RootKey> {
        self.root_key.read().clone()
    }

    /// True if a root key is installed.
    pub fn has_root_key(&self) -> bool {
        self.root_key.read().is_some()
    }

    /// Adds or replaces an items key in the ring.
    pub fn add_items_key(&self, key: ItemsKeyMaterial) {
        self.items_keys.write().insert(key.uuid().to_string(), key);
    }

    /// Removes an items key from the ring.
    pub fn remove_items_key(&self, uuid: &str) {
        self.items_keys.write().remove(uuid);
    }

    /// Empties the ring.
    pub fn clear_items_keys(&self) {
        self.items_keys.write().clear();
    }

    /// Looks up an items key.
    pub fn items_key(&self, uuid: &str) -> Option<ItemsKeyMaterial> {
        self.items_keys.read().get(uuid).cloned()
    }

    /// All items keys in uuid order.
    pub fn items_keys(&self) -> Vec<ItemsKeyMaterial> {
        self.items_keys.read().values().cloned().collect()
    }

    /// The items key new items are encrypted under.
    pub fn default_items_key(&self) -> Option<ItemsKeyMaterial> {
        self.items_keys.read().values().find(|k| k.is_default()).cloned()
    }

    /// Creates items-key material for a new items key under the root key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MissingKey`] if no root key is set.
    pub fn create_items_key(&self, uuid: &str) -> CryptoResult<ItemsKeyMaterial> {
        let root_key = self
            .root_key()
            .ok_or_else(|| CryptoError::MissingKey("creating an items key needs a root key".into()))?;
        Ok(Operator::for_version(root_key.version()).create_items_key(uuid, &root_key))
    }

    /// Content for a new default items key item.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MissingKey`] if no root key is set.
    pub fn create_items_key_content(&self, uuid: &str) -> CryptoResult<ItemContent> {
        Ok(self.create_items_key(uuid)?.with_default(true).to_content())
    }

    /// The key `payload` would be encrypted under, if any.
    pub fn key_for_encryption(&self, payload: &Payload) -> Option<WrappingKey> {
        if is_root_wrapped(&payload.content_type) {
            return self.root_key().map(WrappingKey::Root);
        }
        if let Some(key) = self.default_items_key() {
            return Some(WrappingKey::Items(key));
        }
        self.root_key()
            .filter(|k| k.version().is_legacy())
            .map(WrappingKey::Root)
    }

    /// Encrypts a payload for `intent`.
    ///
    /// Payloads without plaintext content (tombstones, undecryptable
    /// items) are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MissingKey`] if the intent requires
    /// encryption and no key applies.
    pub fn encrypt_payload(&self, payload: &Payload, intent: EncryptionIntent) -> CryptoResult<Payload> {
        if payload.decrypted_content().is_none() || intent.is_decrypted() {
            return Ok(payload.clone());
        }
        match self.key_for_encryption(payload) {
            Some(key) => self.encrypt_payload_with_key(payload, &key),
            None if intent.requires_encryption() => Err(CryptoError::MissingKey(format!(
                "no key to encrypt {} for {intent:?}",
                payload.uuid
            ))),
            None => Ok(payload.clone()),
        }
    }

    /// Encrypts a payload under an explicit key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key lacks material its version needs.
    pub fn encrypt_payload_with_key(&self, payload: &Payload, key: &WrappingKey) -> CryptoResult<Payload> {
        let Some(content) = payload.decrypted_content() else {
            return Ok(payload.clone());
        };
        let params = Operator::for_key(key).encrypt(&payload.uuid, content, key)?;
        Ok(with_encrypted_parameters(payload, params))
    }

    /// Encrypts several payloads for `intent`.
    ///
    /// # Errors
    ///
    /// Returns the first encryption error.
    pub fn encrypt_payloads(&self, payloads: &[Payload], intent: EncryptionIntent) -> CryptoResult<Vec<Payload>> {
        payloads.iter().map(|p| self.encrypt_payload(p, intent)).collect()
    }

    /// Decrypts a payload with the key it names or implies.
    ///
    /// Authentication failures and missing keys are recorded on the
    /// returned payload.
    ///
    /// # Errors
    ///
    /// Returns an error only for malformed ciphertext or unsupported versions.
    pub fn decrypt_payload(&self, payload: &Payload) -> CryptoResult<Payload> {
        if !payload.is_encrypted() {
            return Ok(payload.clone());
        }
        let params = EncryptedParameters::from_payload(payload)?;
        match self.key_for_decryption(payload, &params) {
            Some(key) => self.decrypt_with_parameters(payload, &params, &key),
            None => {
                debug!(uuid = %payload.uuid, "no key available, waiting for key");
                Ok(with_decryption_error(payload, true))
            }
        }
    }

    /// Decrypts a payload with an explicit key.
    ///
    /// # Errors
    ///
    /// Returns an error only for malformed ciphertext or unsupported versions.
    pub fn decrypt_payload_with_key(&self, payload: &Payload, key: &WrappingKey) -> CryptoResult<Payload> {
        if !payload.is_encrypted() {
            return Ok(payload.clone());
        }
        let params = EncryptedParameters::from_payload(payload)?;
        self.decrypt_with_parameters(payload, &params, key)
    }

    /// Decrypts a batch. One bad payload never blocks the others.
    pub fn decrypt_payloads(&self, payloads: &[Payload]) -> DecryptedBatch {
        self.decrypt_batch(payloads, |p| self.decrypt_payload(p))
    }

    /// Decrypts a batch with an explicit key.
    pub fn decrypt_payloads_with_key(&self, payloads: &[Payload], key: &WrappingKey) -> DecryptedBatch {
        self.decrypt_batch(payloads, |p| self.decrypt_payload_with_key(p, key))
    }

    fn decrypt_batch<F>(&self, payloads: &[Payload], decrypt: F) -> DecryptedBatch
    where
        F: Fn(&Payload) -> CryptoResult<Payload>,
    {
        let mut batch = DecryptedBatch::default();
        for payload in payloads {
            match decrypt(payload) {
                Ok(decrypted) => batch.payloads.push(decrypted),
                Err(err) => {
                    warn!(uuid = %payload.uuid, error = %err, "payload cannot be decrypted");
                    batch.payloads.push(with_decryption_error(payload, false));
                    batch.fatal.push((payload.uuid.clone(), err));
                }
            }
        }
        batch
    }

    fn decrypt_with_parameters(
        &self,
        payload: &Payload,
        params: &EncryptedParameters,
        key: &WrappingKey,
    ) -> CryptoResult<Payload> {
        match Operator::for_key(key).decrypt(params, key) {
            Ok(content) => Ok(with_decrypted_content(payload, content)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                let waiting = matches!(err, CryptoError::KeyMismatch(_));
                warn!(uuid = %payload.uuid, error = %err, waiting_for_key = waiting, "decryption failed");
                Ok(with_decryption_error(payload, waiting))
            }
        }
    }

    fn key_for_decryption(&self, payload: &Payload, params: &EncryptedParameters) -> Option<WrappingKey> {
        if let Some(id) = &params.items_key_id {
            return self.items_key(id).map(WrappingKey::Items);
        }
        if is_root_wrapped(&payload.content_type) || !params.version.is_legacy() {
            return self.root_key().map(WrappingKey::Root);
        }
        let legacy_items_key = {
            let ring = self.items_keys.read();
            ring.values()
                .filter(|k| k.version().is_legacy())
                .max_by_key(|k| k.is_default())
                .cloned()
        };
        legacy_items_key
            .map(WrappingKey::Items)
            .or_else(|| self.root_key().map(WrappingKey::Root))
    }
}

impl std::fmt::Debug for ProtocolService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolService")
            .field("has_root_key", &self.has_root_key())
            .field("items_keys", &self.items_keys.read().len())
            .finish()
    }
}

fn is_root_wrapped(content_type: &ContentType) -> bool {
    matches!(content_type, ContentType::ItemsKey | ContentType::EncryptedStorage)
}

fn with_encrypted_parameters(payload: &Payload, params: EncryptedParameters) -> Payload {
    let mut out = payload.clone();
    out.content = Some(Content::Encrypted(params.content));
    out.enc_item_key = Some(params.enc_item_key);
    out.items_key_id = params.items_key_id;
    out.auth_hash = params.auth_hash;
    out
}

fn with_decrypted_content(payload: &Payload, content: ItemContent) -> Payload {
    let mut out = payload.clone();
    out.content = Some(Content::Decrypted(content));
    out.enc_item_key = None;
    out.auth_hash = None;
    out.error_decrypting_value_changed = payload.error_decrypting;
    out.error_decrypting = false;
    out.waiting_for_key = false;
    out
}

fn with_decryption_error(payload: &Payload, waiting_for_key: bool) -> Payload {
    let mut out = payload.clone();
    out.error_decrypting_value_changed = !payload.error_decrypting;
    out.error_decrypting = true;
    out.waiting_for_key = waiting_for_key;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_service() -> ProtocolService {
        let service = ProtocolService::new();
        let params = KeyParams::generate("a@b.c", ProtocolVersion::V003).with_cost(1000);
        service.set_root_key(service.compute_root_key("password", &params).unwrap());
        service
    }

    fn modern_service() -> ProtocolService {
        let service = ProtocolService::new();
        let params = KeyParams::generate("a@b.c", ProtocolVersion::V004).with_cost(1000);
        service.set_root_key(service.compute_root_key("password", &params).unwrap());
        let items_key = service.create_items_key("ik-1").unwrap().with_default(true);
        service.add_items_key(items_key);
        service
    }

    fn note() -> Payload {
        Payload::new(ContentType::Note, ItemContent::with_title_and_text("t", "body"))
    }

    #[test]
    fn no_key_prefer_encrypted_keeps_plaintext() {
        let service = ProtocolService::new();
        let out = service
            .encrypt_payload(&note(), EncryptionIntent::LocalStoragePreferEncrypted)
            .unwrap();
        assert!(!out.is_encrypted());
    }

    #[test]
    fn no_key_sync_is_missing_key() {
        let service = ProtocolService::new();
        assert!(matches!(
            service.encrypt_payload(&note(), EncryptionIntent::Sync),
            Err(CryptoError::MissingKey(_))
        ));
    }

    #[test]
    fn decrypted_intent_never_encrypts() {
        let service = modern_service();
        let out = service.encrypt_payload(&note(), EncryptionIntent::FileDecrypted).unwrap();
        assert!(!out.is_encrypted());
    }

    #[test]
    fn legacy_account_encrypts_under_root_key() {
        let service = legacy_service();
        let payload = note();
        let encrypted = service.encrypt_payload(&payload, EncryptionIntent::Sync).unwrap();
        assert!(encrypted.encrypted_content().unwrap().starts_with("003:"));
        assert!(encrypted.items_key_id.is_none());

        let decrypted = service.decrypt_payload(&encrypted).unwrap();
        assert_eq!(decrypted.content, payload.content);
        assert!(!decrypted.error_decrypting);
    }

    #[test]
    fn items_key_payloads_use_root_key() {
        let service = modern_service();
        let material = service.items_key("ik-1").unwrap();
        let payload = Payload::with_uuid("ik-1", ContentType::ItemsKey, material.to_content());
        let encrypted = service.encrypt_payload(&payload, EncryptionIntent::Sync).unwrap();
        assert!(encrypted.items_key_id.is_none());
        assert!(encrypted.encrypted_content().unwrap().starts_with("004:"));

        let decrypted = service.decrypt_payload(&encrypted).unwrap();
        let parsed = ItemsKeyMaterial::from_content("ik-1", decrypted.decrypted_content().unwrap()).unwrap();
        assert_eq!(parsed.items_key(), material.items_key());
    }

    #[test]
    fn modern_account_uses_items_key() {
        let service = modern_service();
        let payload = note();
        let encrypted = service.encrypt_payload(&payload, EncryptionIntent::Sync).unwrap();
        assert_eq!(encrypted.items_key_id.as_deref(), Some("ik-1"));

        let decrypted = service.decrypt_payload(&encrypted).unwrap();
        assert_eq!(decrypted.decrypted_content().unwrap().title(), Some("t"));
        assert!(decrypted.enc_item_key.is_none());
    }

    #[test]
    fn unknown_items_key_waits_for_key() {
        let service = modern_service();
        let encrypted = service.encrypt_payload(&note(), EncryptionIntent::Sync).unwrap();
        service.remove_items_key("ik-1");

        let out = service.decrypt_payload(&encrypted).unwrap();
        assert!(out.waiting_for_key);
        assert!(out.error_decrypting);
        assert!(out.error_decrypting_value_changed);
        assert!(out.is_encrypted());
    }

    #[test]
    fn error_flag_change_is_reported_once() {
        let service = modern_service();
        let mut encrypted = service.encrypt_payload(&note(), EncryptionIntent::Sync).unwrap();
        let other = modern_service();
        encrypted.items_key_id = Some("ik-1".into());

        let first = other.decrypt_payload(&encrypted).unwrap();
        assert!(first.error_decrypting);
        assert!(first.error_decrypting_value_changed);

        let second = other.decrypt_payload(&first).unwrap();
        assert!(second.error_decrypting);
        assert!(!second.error_decrypting_value_changed);

        let recovered = service.decrypt_payload(&second).unwrap();
        assert!(!recovered.error_decrypting);
        assert!(recovered.error_decrypting_value_changed);
    }

    #[test]
    fn batch_reports_fatal_payloads_separately() {
        let service = modern_service();
        let good = service.encrypt_payload(&note(), EncryptionIntent::Sync).unwrap();
        let mut malformed = good.clone();
        malformed.uuid = "bad".into();
        malformed.content = Some(Content::Encrypted("004:onlytwo".into()));
        let mut unsupported = good.clone();
        unsupported.uuid = "future".into();
        unsupported.content = Some(Content::Encrypted("009:a:b:c".into()));

        let batch = service.decrypt_payloads(&[good, malformed, unsupported]);
        assert_eq!(batch.payloads.len(), 3);
        assert!(!batch.payloads[0].error_decrypting);
        assert_eq!(batch.error_count(), 2);
        assert_eq!(batch.fatal.len(), 2);
        assert!(batch.fatal.iter().all(|(_, e)| e.is_fatal()));
    }

    #[test]
    fn legacy_items_key_copies_root_material() {
        let service = legacy_service();
        let material = service.create_items_key("k").unwrap();
        let root = service.root_key().unwrap();
        assert_eq!(material.version(), ProtocolVersion::V003);
        assert_eq!(material.items_key(), root.master_key());
        assert_eq!(material.data_authentication_key(), root.data_authentication_key());
    }

    #[test]
    fn account_password_validation() {
        let service = legacy_service();
        assert!(service.validate_account_password("password").unwrap());
        assert!(!service.validate_account_password("wrong").unwrap());
        assert!(ProtocolService::new().validate_account_password("x").is_err());
    }

    #[test]
    fn default_items_key_selection() {
        let service = modern_service();
        service.add_items_key(service.create_items_key("ik-0").unwrap());
        assert_eq!(service.default_items_key().unwrap().uuid(), "ik-1");
        assert_eq!(service.items_keys().len(), 2);
    }
}
