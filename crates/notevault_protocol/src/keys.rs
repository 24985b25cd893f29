//! Root keys, items keys and the key used to wrap an item key.

use crate::error::{CryptoError, CryptoResult};
use crate::key_params::KeyParams;
use crate::primitives::constant_time_eq;
use crate::version::ProtocolVersion;
use notevault_model::ItemContent;
use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key derived from the account password.
///
/// Wraps items keys (and, for legacy accounts, items directly). The
/// server password half is sent to the server for authentication; the
/// master key half never leaves the client.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    #[zeroize(skip)]
    key_params: KeyParams,
    master_key: String,
    server_password: String,
    data_authentication_key: Option<String>,
}

impl RootKey {
    /// Assembles a root key from derived components.
    pub fn new(
        key_params: KeyParams,
        master_key: String,
        server_password: String,
        data_authentication_key: Option<String>,
    ) -> Self {
        Self {
            key_params,
            master_key,
            server_password,
            data_authentication_key,
        }
    }

    /// Protocol version of this key.
    pub fn version(&self) -> ProtocolVersion {
        self.key_params.version
    }

    /// Parameters this key was derived with.
    pub fn key_params(&self) -> &KeyParams {
        &self.key_params
    }

    /// Hex master key.
    pub fn master_key(&self) -> &str {
        &self.master_key
    }

    /// Hex server password.
    pub fn server_password(&self) -> &str {
        &self.server_password
    }

    /// Hex authentication key, present for 001 through 003.
    pub fn data_authentication_key(&self) -> Option<&str> {
        self.data_authentication_key.as_deref()
    }

    /// Checks a candidate server password in constant time.
    pub fn verify_server_password(&self, candidate: &str) -> bool {
        constant_time_eq(self.server_password.as_bytes(), candidate.as_bytes())
    }

    /// True if both keys hold the same key material.
    pub fn same_material(&self, other: &RootKey) -> bool {
        constant_time_eq(self.master_key.as_bytes(), other.master_key.as_bytes())
            && self.verify_server_password(&other.server_password)
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("version", &self.key_params.version)
            .field("identifier", &self.key_params.identifier)
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

/// Decrypted key material of an items key.
///
/// Content fields: `itemsKey`, `dataAuthenticationKey`, `version` and
/// `isDefault`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ItemsKeyMaterial {
    #[zeroize(skip)]
    uuid: String,
    #[zeroize(skip)]
    version: ProtocolVersion,
    items_key: String,
    data_authentication_key: Option<String>,
    #[zeroize(skip)]
    is_default: bool,
}

impl ItemsKeyMaterial {
    /// Content key holding the hex items key.
    pub const ITEMS_KEY_FIELD: &'static str = "itemsKey";
    /// Content key holding the hex authentication key.
    pub const AUTH_KEY_FIELD: &'static str = "dataAuthenticationKey";
    /// Content key holding the protocol version.
    pub const VERSION_FIELD: &'static str = "version";
    /// Content key holding the default flag.
    pub const DEFAULT_FIELD: &'static str = "isDefault";

    /// Assembles items-key material.
    pub fn new(
        uuid: impl Into<String>,
        version: ProtocolVersion,
        items_key: String,
        data_authentication_key: Option<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            version,
            items_key,
            data_authentication_key,
            is_default: false,
        }
    }

    /// Reads key material from decrypted items-key content.
    ///
    /// # Errors
    ///
    /// Returns an error if `itemsKey` or `version` is missing or invalid.
    pub fn from_content(uuid: impl Into<String>, content: &ItemContent) -> CryptoResult<Self> {
        let items_key = content
            .get_str(Self::ITEMS_KEY_FIELD)
            .ok_or_else(|| CryptoError::InvalidKeyParams("items key content lacks itemsKey".into()))?
            .to_string();
        let version = content
            .get_str(Self::VERSION_FIELD)
            .ok_or_else(|| CryptoError::InvalidKeyParams("items key content lacks version".into()))
            .and_then(ProtocolVersion::parse)?;
        let data_authentication_key = content.get_str(Self::AUTH_KEY_FIELD).map(str::to_string);
        let is_default = content
            .get(Self::DEFAULT_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            uuid: uuid.into(),
            version,
            items_key,
            data_authentication_key,
            is_default,
        })
    }

    /// Writes the key material into a fresh content record.
    pub fn to_content(&self) -> ItemContent {
        let mut content = ItemContent::new();
        content.set(Self::ITEMS_KEY_FIELD, Value::String(self.items_key.clone()));
        if let Some(auth) = &self.data_authentication_key {
            content.set(Self::AUTH_KEY_FIELD, Value::String(auth.clone()));
        }
        content.set(Self::VERSION_FIELD, Value::String(self.version.to_string()));
        content.set(Self::DEFAULT_FIELD, Value::Bool(self.is_default));
        content
    }

    /// Returns a copy with the default flag set.
    #[must_use]
    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    /// Uuid of the items-key item.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Protocol version of this key.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Hex items key.
    pub fn items_key(&self) -> &str {
        &self.items_key
    }

    /// Hex authentication key, present for 001 through 003.
    pub fn data_authentication_key(&self) -> Option<&str> {
        self.data_authentication_key.as_deref()
    }

    /// True if new items are encrypted under this key.
    pub fn is_default(&self) -> bool {
        self.is_default
    }
}

impl std::fmt::Debug for ItemsKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemsKeyMaterial")
            .field("uuid", &self.uuid)
            .field("version", &self.version)
            .field("is_default", &self.is_default)
            .field("items_key", &"[REDACTED]")
            .finish()
    }
}

/// The key used to wrap or unwrap a per-item key.
#[derive(Debug, Clone)]
pub enum WrappingKey {
    /// The account root key.
    Root(RootKey),
    /// An items key.
    Items(ItemsKeyMaterial),
}

impl WrappingKey {
    /// Protocol version of the key.
    pub fn version(&self) -> ProtocolVersion {
        match self {
            WrappingKey::Root(key) => key.version(),
            WrappingKey::Items(key) => key.version(),
        }
    }

    /// Hex encryption key.
    pub(crate) fn encryption_key(&self) -> &str {
        match self {
            WrappingKey::Root(key) => key.master_key(),
            WrappingKey::Items(key) => key.items_key(),
        }
    }

    /// Hex authentication key, for legacy versions.
    pub(crate) fn authentication_key(&self) -> Option<&str> {
        match self {
            WrappingKey::Root(key) => key.data_authentication_key(),
            WrappingKey::Items(key) => key.data_authentication_key(),
        }
    }

    /// Uuid recorded as `items_key_id` on payloads wrapped by this key.
    pub fn items_key_id(&self) -> Option<&str> {
        match self {
            WrappingKey::Root(_) => None,
            WrappingKey::Items(key) => Some(key.uuid()),
        }
    }

    /// Key params bound into ciphertexts wrapped by a root key.
    pub fn key_params(&self) -> Option<&KeyParams> {
        match self {
            WrappingKey::Root(key) => Some(key.key_params()),
            WrappingKey::Items(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_key_content_roundtrip() {
        let material = ItemsKeyMaterial::new("k1", ProtocolVersion::V004, "ab".repeat(32), None)
            .with_default(true);
        let content = material.to_content();
        let parsed = ItemsKeyMaterial::from_content("k1", &content).unwrap();
        assert_eq!(parsed.items_key(), material.items_key());
        assert_eq!(parsed.version(), ProtocolVersion::V004);
        assert!(parsed.is_default());
        assert!(parsed.data_authentication_key().is_none());
    }

    #[test]
    fn items_key_content_requires_key() {
        let content = ItemContent::new();
        assert!(ItemsKeyMaterial::from_content("k1", &content).is_err());
    }

    #[test]
    fn debug_output_is_redacted() {
        let params = KeyParams::generate("a@b.c", ProtocolVersion::V004);
        let root = RootKey::new(params, "secretmaster".into(), "secretpw".into(), None);
        let debug = format!("{root:?}");
        assert!(!debug.contains("secretmaster"));
        assert!(debug.contains("REDACTED"));

        let items = ItemsKeyMaterial::new("k", ProtocolVersion::V004, "secretkey".into(), None);
        assert!(!format!("{items:?}").contains("secretkey"));
    }

    #[test]
    fn server_password_check() {
        let params = KeyParams::generate("a@b.c", ProtocolVersion::V004);
        let root = RootKey::new(params, "mk".into(), "pw".into(), None);
        assert!(root.verify_server_password("pw"));
        assert!(!root.verify_server_password("px"));
    }

    #[test]
    fn wrapping_key_ids() {
        let params = KeyParams::generate("a@b.c", ProtocolVersion::V003);
        let root = WrappingKey::Root(RootKey::new(params, "mk".into(), "pw".into(), Some("ak".into())));
        assert!(root.items_key_id().is_none());
        assert!(root.key_params().is_some());
        assert_eq!(root.authentication_key(), Some("ak"));

        let items = WrappingKey::Items(ItemsKeyMaterial::new("k9", ProtocolVersion::V004, "ik".into(), None));
        assert_eq!(items.items_key_id(), Some("k9"));
        assert_eq!(items.encryption_key(), "ik");
    }
}
