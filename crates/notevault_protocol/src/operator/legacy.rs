//! Protocols 001, 002 and 003: AES-256-CBC with HMAC-SHA256.

use super::{unwrap_failure, EncryptedParameters};
use crate::error::{CryptoError, CryptoResult};
use crate::key_params::KeyParams;
use crate::keys::{RootKey, WrappingKey};
use crate::primitives::{
    aes_cbc_decrypt, aes_cbc_encrypt, hmac_sha256_hex, pbkdf2_sha512_hex, random_bytes, random_hex,
    sha256_hex, verify_hmac_sha256, IV_SIZE,
};
use crate::version::ProtocolVersion;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use zeroize::Zeroizing;

/// Derived key length in bytes: three 256-bit keys.
const DERIVED_LENGTH: usize = 96;
/// Item key length in bytes: encryption half and authentication half.
const ITEM_KEY_LENGTH: usize = 64;

pub(super) fn derive_root_key(password: &str, params: &KeyParams) -> CryptoResult<RootKey> {
    let cost = params.derivation_cost()?;
    let salt = match params.version {
        ProtocolVersion::V003 => {
            let nonce = params
                .pw_nonce
                .as_deref()
                .ok_or_else(|| CryptoError::InvalidKeyParams("pw_nonce is required".into()))?;
            sha256_hex(&format!("{}:SF:003:{cost}:{nonce}", params.identifier))
        }
        _ => params
            .pw_salt
            .clone()
            .ok_or_else(|| CryptoError::InvalidKeyParams("pw_salt is required".into()))?,
    };

    let derived = pbkdf2_sha512_hex(password, &salt, cost, DERIVED_LENGTH)?;
    let third = derived.len() / 3;
    let server_password = derived[..third].to_string();
    let master_key = derived[third..2 * third].to_string();
    let auth_key = derived[2 * third..].to_string();

    Ok(RootKey::new(params.clone(), master_key, server_password, Some(auth_key)))
}

pub(super) fn encrypt(
    version: ProtocolVersion,
    uuid: &str,
    plaintext: &str,
    key: &WrappingKey,
) -> CryptoResult<EncryptedParameters> {
    if version != ProtocolVersion::V001 && key.authentication_key().is_none() {
        return Err(CryptoError::MissingKey(format!(
            "version {version} requires an authentication key"
        )));
    }

    let item_key = Zeroizing::new(random_hex(ITEM_KEY_LENGTH));
    let (item_ek, item_ak) = item_key.split_at(item_key.len() / 2);
    let key_params = key.key_params();

    let (content, auth_hash) = encrypt_string(version, plaintext, item_ek, Some(item_ak), uuid, key_params)?;
    let (enc_item_key, _) = encrypt_string(
        version,
        &item_key,
        key.encryption_key(),
        key.authentication_key(),
        uuid,
        key_params,
    )?;

    Ok(EncryptedParameters {
        uuid: uuid.to_string(),
        content,
        enc_item_key,
        items_key_id: key.items_key_id().map(str::to_string),
        auth_hash,
        version,
    })
}

pub(super) fn decrypt(params: &EncryptedParameters, key: &WrappingKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let item_key = decrypt_string(
        &params.enc_item_key,
        key.encryption_key(),
        key.authentication_key(),
        &params.uuid,
        None,
    )
    .map_err(unwrap_failure)?;
    let item_key = Zeroizing::new(
        String::from_utf8(item_key.to_vec()).map_err(|_| CryptoError::key_mismatch("item key is not UTF-8"))?,
    );
    if item_key.len() != ITEM_KEY_LENGTH * 2 {
        return Err(CryptoError::key_mismatch("unwrapped item key has wrong length"));
    }
    let (item_ek, item_ak) = item_key.split_at(item_key.len() / 2);

    let detached = if params.version == ProtocolVersion::V001 {
        Some(
            params
                .auth_hash
                .as_deref()
                .ok_or_else(|| CryptoError::authentication("001 payload has no auth_hash"))?,
        )
    } else {
        None
    };

    decrypt_string(&params.content, item_ek, Some(item_ak), &params.uuid, detached)
}

/// Encrypts one string. Returns the ciphertext string and, for 001, the
/// detached MAC.
fn encrypt_string(
    version: ProtocolVersion,
    plaintext: &str,
    enc_key: &str,
    auth_key: Option<&str>,
    uuid: &str,
    key_params: Option<&KeyParams>,
) -> CryptoResult<(String, Option<String>)> {
    if version == ProtocolVersion::V001 {
        let ciphertext = aes_cbc_encrypt(enc_key, &[0u8; IV_SIZE], plaintext.as_bytes())?;
        let string = format!("001{}", BASE64.encode(ciphertext));
        let auth_hash = auth_key.map(|ak| hmac_sha256_hex(ak, &string)).transpose()?;
        return Ok((string, auth_hash));
    }

    let auth_key = auth_key.ok_or_else(|| CryptoError::MissingKey("authentication key".into()))?;
    let iv = random_bytes(IV_SIZE);
    let iv_hex = hex::encode(&iv);
    let ciphertext = BASE64.encode(aes_cbc_encrypt(enc_key, &iv, plaintext.as_bytes())?);
    let authenticated = format!("{version}:{uuid}:{iv_hex}:{ciphertext}");
    let mac = hmac_sha256_hex(auth_key, &authenticated)?;

    let mut string = format!("{version}:{mac}:{uuid}:{iv_hex}:{ciphertext}");
    if version == ProtocolVersion::V003 {
        if let Some(params) = key_params {
            string.push(':');
            string.push_str(&params.to_base64_json()?);
        }
    }
    Ok((string, None))
}

/// Decrypts one legacy string of any legacy version.
fn decrypt_string(
    string: &str,
    enc_key: &str,
    auth_key: Option<&str>,
    uuid: &str,
    detached_mac: Option<&str>,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let version = ProtocolVersion::of_ciphertext(string)?;
    if version == ProtocolVersion::V001 {
        if let Some(tag) = detached_mac {
            let auth_key = auth_key.ok_or_else(|| CryptoError::key_mismatch("no authentication key"))?;
            if !verify_hmac_sha256(auth_key, string, tag)? {
                return Err(CryptoError::authentication("001 MAC mismatch"));
            }
        }
        let ciphertext = BASE64
            .decode(&string[3..])
            .map_err(|_| CryptoError::authentication("ciphertext is not valid base64"))?;
        return aes_cbc_decrypt(enc_key, &[0u8; IV_SIZE], &ciphertext);
    }

    let components: Vec<&str> = string.split(':').collect();
    let expected = match version {
        ProtocolVersion::V003 => components.len() == 5 || components.len() == 6,
        ProtocolVersion::V002 => components.len() == 5,
        _ => false,
    };
    if !expected {
        return Err(CryptoError::malformed(format!(
            "{version} ciphertext has {} components",
            components.len()
        )));
    }
    let (mac, embedded_uuid, iv_hex, ciphertext) = (components[1], components[2], components[3], components[4]);

    if embedded_uuid != uuid {
        return Err(CryptoError::authentication("embedded uuid does not match payload"));
    }
    let auth_key = auth_key.ok_or_else(|| CryptoError::key_mismatch("no authentication key"))?;
    let authenticated = format!("{version}:{embedded_uuid}:{iv_hex}:{ciphertext}");
    if !verify_hmac_sha256(auth_key, &authenticated, mac)? {
        return Err(CryptoError::authentication(format!("{version} MAC mismatch")));
    }

    let iv = hex::decode(iv_hex).map_err(|_| CryptoError::authentication("IV is not valid hex"))?;
    let ciphertext = BASE64
        .decode(ciphertext)
        .map_err(|_| CryptoError::authentication("ciphertext is not valid base64"))?;
    aes_cbc_decrypt(enc_key, &iv, &ciphertext)
}
