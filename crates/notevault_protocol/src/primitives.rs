//! Low-level cryptographic primitives shared by the operators.
//!
//! Keys travel through the protocol as lowercase hex strings; these helpers
//! decode them into zeroizing buffers right before use.

use crate::error::{CryptoError, CryptoResult};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// CBC initialization vector size in bytes.
pub(crate) const IV_SIZE: usize = 16;

/// Returns `len` random bytes.
pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Returns `len` random bytes as lowercase hex.
pub(crate) fn random_hex(len: usize) -> String {
    hex::encode(random_bytes(len))
}

/// SHA-256 of a UTF-8 string as lowercase hex.
pub(crate) fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// PBKDF2-HMAC-SHA512 of `password` with a string salt, as lowercase hex.
pub(crate) fn pbkdf2_sha512_hex(
    password: &str,
    salt: &str,
    iterations: u32,
    length: usize,
) -> CryptoResult<Zeroizing<String>> {
    if iterations == 0 {
        return Err(CryptoError::KeyDerivation("zero iterations".into()));
    }
    let mut out = Zeroizing::new(vec![0u8; length]);
    pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), salt.as_bytes(), iterations, &mut out);
    Ok(Zeroizing::new(hex::encode(out.as_slice())))
}

/// Decodes a hex key into a zeroizing buffer.
pub(crate) fn decode_key(key_hex: &str) -> CryptoResult<Zeroizing<Vec<u8>>> {
    hex::decode(key_hex)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::key_mismatch("key is not valid hex"))
}

/// HMAC-SHA256 of `message` under a hex key, as lowercase hex.
pub(crate) fn hmac_sha256_hex(key_hex: &str, message: &str) -> CryptoResult<String> {
    let key = decode_key(key_hex)?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|_| CryptoError::key_mismatch("invalid authentication key"))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex HMAC-SHA256 tag in constant time.
pub(crate) fn verify_hmac_sha256(key_hex: &str, message: &str, tag_hex: &str) -> CryptoResult<bool> {
    let key = decode_key(key_hex)?;
    let Ok(tag) = hex::decode(tag_hex) else {
        return Ok(false);
    };
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|_| CryptoError::key_mismatch("invalid authentication key"))?;
    mac.update(message.as_bytes());
    Ok(mac.verify_slice(&tag).is_ok())
}

/// AES-256-CBC with PKCS#7 padding.
pub(crate) fn aes_cbc_encrypt(key_hex: &str, iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let key = decode_key(key_hex)?;
    let cipher = Aes256CbcEnc::new_from_slices(&key, iv)
        .map_err(|_| CryptoError::Encryption("invalid CBC key or IV length".into()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Reverses [`aes_cbc_encrypt`]. Bad padding is an authentication failure.
pub(crate) fn aes_cbc_decrypt(
    key_hex: &str,
    iv: &[u8],
    ciphertext: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let key = decode_key(key_hex)?;
    let cipher = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|_| CryptoError::key_mismatch("invalid CBC key or IV length"))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::authentication("invalid padding"))
}

/// Compares two byte strings without short-circuiting on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn pbkdf2_length_and_determinism() {
        let a = pbkdf2_sha512_hex("pw", "salt", 10, 96).unwrap();
        let b = pbkdf2_sha512_hex("pw", "salt", 10, 96).unwrap();
        assert_eq!(a.len(), 192);
        assert_eq!(*a, *b);
        assert_ne!(*a, *pbkdf2_sha512_hex("pw", "salt2", 10, 96).unwrap());
        assert!(pbkdf2_sha512_hex("pw", "salt", 0, 96).is_err());
    }

    #[test]
    fn hmac_verify() {
        let key = random_hex(32);
        let tag = hmac_sha256_hex(&key, "message").unwrap();
        assert!(verify_hmac_sha256(&key, "message", &tag).unwrap());
        assert!(!verify_hmac_sha256(&key, "messagE", &tag).unwrap());
        assert!(!verify_hmac_sha256(&key, "message", "zz").unwrap());
    }

    #[test]
    fn cbc_roundtrip_and_wrong_key() {
        let key = random_hex(32);
        let iv = random_bytes(IV_SIZE);
        let ct = aes_cbc_encrypt(&key, &iv, b"sixteen byte msg and more").unwrap();
        let pt = aes_cbc_decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(pt.as_slice(), b"sixteen byte msg and more");

        let other = random_hex(32);
        // A wrong key almost always breaks the padding; if not, the plaintext differs.
        match aes_cbc_decrypt(&other, &iv, &ct) {
            Ok(garbage) => assert_ne!(garbage.as_slice(), b"sixteen byte msg and more"),
            Err(e) => assert!(matches!(e, CryptoError::AuthenticationFailure(_))),
        }
    }

    #[test]
    fn constant_time_compare() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
