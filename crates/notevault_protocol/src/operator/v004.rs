//! Protocol 004: AES-256-GCM with authenticated data.

use super::{unwrap_failure, EncryptedParameters};
use crate::aead::{AeadCipher, KEY_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key_params::KeyParams;
use crate::keys::{RootKey, WrappingKey};
use crate::primitives::{decode_key, pbkdf2_sha512_hex, random_hex, sha256_hex};
use crate::version::ProtocolVersion;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Derived key length in bytes: master key and server password.
const DERIVED_LENGTH: usize = 64;

/// Authenticated data bound into every 004 ciphertext.
#[derive(Debug, Serialize, Deserialize)]
struct AuthenticatedData {
    u: String,
    v: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kp: Option<KeyParams>,
}

pub(super) fn derive_root_key(password: &str, params: &KeyParams) -> CryptoResult<RootKey> {
    let iterations = params.derivation_cost()?;
    let seed = params
        .seed
        .as_deref()
        .ok_or_else(|| CryptoError::InvalidKeyParams("seed is required".into()))?;
    let salt = sha256_hex(&format!("{}:{seed}", params.identifier));

    let derived = pbkdf2_sha512_hex(password, &salt, iterations, DERIVED_LENGTH)?;
    let half = derived.len() / 2;
    let master_key = derived[..half].to_string();
    let server_password = derived[half..].to_string();

    Ok(RootKey::new(params.clone(), master_key, server_password, None))
}

pub(super) fn generate_item_key() -> Zeroizing<String> {
    Zeroizing::new(random_hex(KEY_SIZE))
}

pub(super) fn encrypt(uuid: &str, plaintext: &str, key: &WrappingKey) -> CryptoResult<EncryptedParameters> {
    let aad = authenticated_data(uuid, key.key_params())?;
    let item_key = generate_item_key();

    let content = encrypt_string(plaintext.as_bytes(), &item_key, &aad)?;
    let enc_item_key = encrypt_string(item_key.as_bytes(), key.encryption_key(), &aad)?;

    Ok(EncryptedParameters {
        uuid: uuid.to_string(),
        content,
        enc_item_key,
        items_key_id: key.items_key_id().map(str::to_string),
        auth_hash: None,
        version: ProtocolVersion::V004,
    })
}

pub(super) fn decrypt(params: &EncryptedParameters, key: &WrappingKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let item_key = decrypt_string(&params.enc_item_key, key.encryption_key(), &params.uuid)
        .map_err(unwrap_failure)?;
    let item_key = Zeroizing::new(
        String::from_utf8(item_key.to_vec()).map_err(|_| CryptoError::key_mismatch("item key is not UTF-8"))?,
    );
    decrypt_string(&params.content, &item_key, &params.uuid)
}

fn authenticated_data(uuid: &str, key_params: Option<&KeyParams>) -> CryptoResult<String> {
    let data = AuthenticatedData {
        u: uuid.to_string(),
        v: ProtocolVersion::V004.to_string(),
        kp: key_params.cloned(),
    };
    let json = serde_json::to_string(&data)
        .map_err(|e| CryptoError::Encryption(format!("authenticated data: {e}")))?;
    Ok(BASE64.encode(json))
}

fn encrypt_string(plaintext: &[u8], key_hex: &str, aad: &str) -> CryptoResult<String> {
    let key = decode_key(key_hex)?;
    let cipher = AeadCipher::new(&key)?;
    let nonce = AeadCipher::generate_nonce();
    let ciphertext = cipher.encrypt(&nonce, plaintext, aad.as_bytes())?;
    Ok(format!(
        "{}:{}:{}:{aad}",
        ProtocolVersion::V004,
        hex::encode(nonce),
        BASE64.encode(ciphertext)
    ))
}

/// Decrypts one 004 string. Any component that fails to decode counts as
/// tampering, not as a structural error.
fn decrypt_string(string: &str, key_hex: &str, uuid: &str) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let components: Vec<&str> = string.split(':').collect();
    if components.len() != 4 {
        return Err(CryptoError::malformed(format!(
            "004 ciphertext has {} components",
            components.len()
        )));
    }
    if ProtocolVersion::parse(components[0])? != ProtocolVersion::V004 {
        return Err(CryptoError::key_mismatch("not a 004 ciphertext"));
    }
    let (nonce_hex, ciphertext_b64, aad) = (components[1], components[2], components[3]);

    let data: AuthenticatedData = BASE64
        .decode(aad)
        .ok()
        .and_then(|json| serde_json::from_slice(&json).ok())
        .ok_or_else(|| CryptoError::authentication("authenticated data does not decode"))?;
    if data.u != uuid || data.v != ProtocolVersion::V004.as_str() {
        return Err(CryptoError::authentication("authenticated data does not match payload"));
    }

    let nonce = hex::decode(nonce_hex).map_err(|_| CryptoError::authentication("nonce is not valid hex"))?;
    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|_| CryptoError::authentication("ciphertext is not valid base64"))?;

    let key = decode_key(key_hex)?;
    let cipher = AeadCipher::new(&key)?;
    cipher
        .decrypt(&nonce, &ciphertext, aad.as_bytes())
        .map(Zeroizing::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_format_has_four_components() {
        let key = random_hex(KEY_SIZE);
        let aad = authenticated_data("u1", None).unwrap();
        let string = encrypt_string(b"hello", &key, &aad).unwrap();
        let components: Vec<&str> = string.split(':').collect();
        assert_eq!(components.len(), 4);
        assert_eq!(components[0], "004");
        assert_eq!(components[1].len(), 24);
        assert_eq!(decrypt_string(&string, &key, "u1").unwrap().as_slice(), b"hello");
    }

    #[test]
    fn aad_binds_uuid() {
        let key = random_hex(KEY_SIZE);
        let aad = authenticated_data("u1", None).unwrap();
        let string = encrypt_string(b"hello", &key, &aad).unwrap();
        assert!(matches!(
            decrypt_string(&string, &key, "u2"),
            Err(CryptoError::AuthenticationFailure(_))
        ));
    }

    #[test]
    fn aad_carries_key_params_for_root_wrapping() {
        let params = KeyParams::generate("a@b.c", ProtocolVersion::V004);
        let aad = authenticated_data("u1", Some(&params)).unwrap();
        let json = BASE64.decode(aad).unwrap();
        let data: AuthenticatedData = serde_json::from_slice(&json).unwrap();
        assert_eq!(data.kp.unwrap().identifier, "a@b.c");
    }

    #[test]
    fn derive_splits_in_halves() {
        let params = KeyParams::generate("a@b.c", ProtocolVersion::V004).with_cost(1000);
        let key = derive_root_key("password", &params).unwrap();
        assert_eq!(key.master_key().len(), 64);
        assert_eq!(key.server_password().len(), 64);
        assert!(key.data_authentication_key().is_none());

        let again = derive_root_key("password", &params).unwrap();
        assert!(key.same_material(&again));
        let other = derive_root_key("passwordx", &params).unwrap();
        assert!(!key.same_material(&other));
    }
}
