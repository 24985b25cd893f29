//! Version-dispatched protocol operators.
//!
//! An [`Operator`] is picked from a key's version. Legacy operators
//! (001 through 003) share the CBC + HMAC family and read any older legacy
//! string; the 004 operator reads only 004 strings.

mod legacy;
mod v004;

use crate::error::{CryptoError, CryptoResult};
use crate::key_params::KeyParams;
use crate::keys::{ItemsKeyMaterial, RootKey, WrappingKey};
use crate::version::ProtocolVersion;
use notevault_model::{ItemContent, Payload};
use zeroize::Zeroizing;

/// The encrypted fields of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedParameters {
    /// Payload uuid bound into the ciphertext.
    pub uuid: String,
    /// Ciphertext string of the content.
    pub content: String,
    /// Wrapped item key.
    pub enc_item_key: String,
    /// Items key that wraps `enc_item_key`.
    pub items_key_id: Option<String>,
    /// Detached MAC (001 only).
    pub auth_hash: Option<String>,
    /// Version parsed from the content string.
    pub version: ProtocolVersion,
}

impl EncryptedParameters {
    /// Extracts the encrypted fields of a payload.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedCiphertext`] if the content is not a
    /// ciphertext string or the wrapped key is missing, and
    /// [`CryptoError::UnsupportedVersion`] for unknown version tags.
    pub fn from_payload(payload: &Payload) -> CryptoResult<Self> {
        let content = payload
            .encrypted_content()
            .ok_or_else(|| CryptoError::malformed("payload content is not a ciphertext string"))?;
        let enc_item_key = payload
            .enc_item_key
            .clone()
            .ok_or_else(|| CryptoError::malformed("payload has no enc_item_key"))?;
        let version = check_structure(content)?;
        check_structure(&enc_item_key)?;

        Ok(Self {
            uuid: payload.uuid.clone(),
            content: content.to_string(),
            enc_item_key,
            items_key_id: payload.items_key_id.clone(),
            auth_hash: payload.auth_hash.clone(),
            version,
        })
    }
}

/// Cryptographic operator for one protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Protocol 001.
    V001,
    /// Protocol 002.
    V002,
    /// Protocol 003.
    V003,
    /// Protocol 004.
    V004,
}

impl Operator {
    /// Operator for `version`.
    pub fn for_version(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V001 => Operator::V001,
            ProtocolVersion::V002 => Operator::V002,
            ProtocolVersion::V003 => Operator::V003,
            ProtocolVersion::V004 => Operator::V004,
        }
    }

    /// Operator for the version of `key`.
    pub fn for_key(key: &WrappingKey) -> Self {
        Self::for_version(key.version())
    }

    /// Version this operator writes.
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Operator::V001 => ProtocolVersion::V001,
            Operator::V002 => ProtocolVersion::V002,
            Operator::V003 => ProtocolVersion::V003,
            Operator::V004 => ProtocolVersion::V004,
        }
    }

    /// True if this operator can read ciphertexts of `version`.
    pub fn can_read(&self, version: ProtocolVersion) -> bool {
        let own = self.version();
        if own.is_legacy() {
            version.is_legacy() && version <= own
        } else {
            version == own
        }
    }

    /// Derives the root key for `password` under `key_params`.
    ///
    /// Cost minimums are not enforced here so existing accounts can still
    /// sign in; see [`KeyParams::validate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the params belong to another version or lack
    /// required fields.
    pub fn derive_root_key(&self, password: &str, key_params: &KeyParams) -> CryptoResult<RootKey> {
        if key_params.version != self.version() {
            return Err(CryptoError::InvalidKeyParams(format!(
                "key params version {} does not match operator {}",
                key_params.version,
                self.version()
            )));
        }
        match self {
            Operator::V004 => v004::derive_root_key(password, key_params),
            _ => legacy::derive_root_key(password, key_params),
        }
    }

    /// Creates items-key material under `root_key`.
    ///
    /// Legacy items keys reuse the root key's master and authentication
    /// keys so that items encrypted before items keys existed stay
    /// readable. 004 items keys are random.
    pub fn create_items_key(&self, uuid: impl Into<String>, root_key: &RootKey) -> ItemsKeyMaterial {
        match self {
            Operator::V004 => ItemsKeyMaterial::new(uuid, self.version(), v004::generate_item_key().to_string(), None),
            _ => ItemsKeyMaterial::new(
                uuid,
                self.version(),
                root_key.master_key().to_string(),
                root_key.data_authentication_key().map(str::to_string),
            ),
        }
    }

    /// Encrypts `content` for the payload `uuid` under a fresh item key
    /// wrapped by `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key lacks material this version needs.
    pub fn encrypt(&self, uuid: &str, content: &ItemContent, key: &WrappingKey) -> CryptoResult<EncryptedParameters> {
        let json = Zeroizing::new(
            serde_json::to_string(content).map_err(|e| CryptoError::Encryption(format!("content: {e}")))?,
        );
        match self {
            Operator::V004 => v004::encrypt(uuid, &json, key),
            _ => legacy::encrypt(self.version(), uuid, &json, key),
        }
    }

    /// Decrypts the content of `params` with `key`.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::KeyMismatch`] if the item key cannot be unwrapped or
    ///   the ciphertext belongs to another version family
    /// - [`CryptoError::AuthenticationFailure`] if the content does not
    ///   authenticate
    /// - [`CryptoError::MalformedCiphertext`] for structurally invalid input
    pub fn decrypt(&self, params: &EncryptedParameters, key: &WrappingKey) -> CryptoResult<ItemContent> {
        if !self.can_read(params.version) {
            return Err(CryptoError::key_mismatch(format!(
                "a {} key cannot read {} ciphertext",
                self.version(),
                params.version
            )));
        }
        let plaintext = match self {
            Operator::V004 => v004::decrypt(params, key)?,
            _ => legacy::decrypt(params, key)?,
        };
        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::malformed(format!("decrypted content is not valid JSON: {e}")))
    }
}

/// Validates the component layout of a ciphertext string and returns its
/// version.
fn check_structure(string: &str) -> CryptoResult<ProtocolVersion> {
    let version = ProtocolVersion::of_ciphertext(string)?;
    let components = string.split(':').count();
    let valid = match version {
        ProtocolVersion::V001 => components == 1 && string.len() > 3,
        ProtocolVersion::V002 => components == 5,
        ProtocolVersion::V003 => components == 5 || components == 6,
        ProtocolVersion::V004 => components == 4,
    };
    if valid {
        Ok(version)
    } else {
        Err(CryptoError::malformed(format!(
            "{version} ciphertext has {components} components"
        )))
    }
}

/// Maps a failure to unwrap the item key onto a key mismatch.
fn unwrap_failure(err: CryptoError) -> CryptoError {
    match err {
        CryptoError::AuthenticationFailure(message) => CryptoError::KeyMismatch(message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notevault_model::ContentType;

    #[test]
    fn structure_checks() {
        assert_eq!(check_structure("004:a:b:c").unwrap(), ProtocolVersion::V004);
        assert_eq!(check_structure("003:a:b:c:d:e").unwrap(), ProtocolVersion::V003);
        assert_eq!(check_structure("001abcd").unwrap(), ProtocolVersion::V001);
        assert!(check_structure("004:a:b").unwrap_err().is_fatal());
        assert!(check_structure("002:a:b:c:d:e").unwrap_err().is_fatal());
        assert!(matches!(
            check_structure("007:a:b:c"),
            Err(CryptoError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn parameters_require_ciphertext() {
        let payload = Payload::new(ContentType::Note, ItemContent::new());
        assert!(EncryptedParameters::from_payload(&payload).unwrap_err().is_fatal());
    }

    #[test]
    fn legacy_operators_read_older_legacy_versions() {
        assert!(Operator::V003.can_read(ProtocolVersion::V002));
        assert!(Operator::V003.can_read(ProtocolVersion::V001));
        assert!(!Operator::V002.can_read(ProtocolVersion::V003));
        assert!(!Operator::V003.can_read(ProtocolVersion::V004));
        assert!(!Operator::V004.can_read(ProtocolVersion::V003));
    }

    #[test]
    fn version_mismatch_in_derivation() {
        let params = KeyParams::generate("a@b.c", ProtocolVersion::V003);
        assert!(matches!(
            Operator::V004.derive_root_key("pw", &params),
            Err(CryptoError::InvalidKeyParams(_))
        ));
    }
}
