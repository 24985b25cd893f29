//! AES-256-GCM used by protocol version 004.

use crate::error::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Authenticated encryption with associated data.
///
/// Unlike a self-framing cipher, the nonce is returned to and supplied by
/// the caller, because the 004 string format carries it as its own
/// component.
pub struct AeadCipher {
    cipher: Aes256Gcm,
}

impl AeadCipher {
    /// Creates a cipher for a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyMismatch`] if the key is not 32 bytes.
    pub fn new(key: &[u8]) -> CryptoResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::key_mismatch(format!(
                "expected {KEY_SIZE}-byte key, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::key_mismatch("invalid AES-256 key"))?;
        Ok(Self { cipher })
    }

    /// Generates a random nonce.
    #[must_use]
    pub fn generate_nonce() -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypts `plaintext`, authenticating `aad`.
    ///
    /// The output is `ciphertext || tag`.
    pub fn encrypt(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::Encryption("AES-GCM encryption error".into()))
    }

    /// Decrypts output of [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::AuthenticationFailure`] if the nonce has the
    /// wrong size, or the ciphertext, tag or associated data do not
    /// authenticate under this key.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::authentication("nonce has wrong size"));
        }
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::authentication("ciphertext too short"));
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::authentication("AES-GCM tag mismatch"))
    }
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadCipher").field("key", &"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = AeadCipher::new(&key()).unwrap();
        let nonce = AeadCipher::generate_nonce();
        let ct = cipher.encrypt(&nonce, b"hello", b"aad").unwrap();
        assert_eq!(ct.len(), 5 + TAG_SIZE);
        assert_eq!(cipher.decrypt(&nonce, &ct, b"aad").unwrap(), b"hello");
    }

    #[test]
    fn wrong_aad_fails() {
        let cipher = AeadCipher::new(&key()).unwrap();
        let nonce = AeadCipher::generate_nonce();
        let ct = cipher.encrypt(&nonce, b"hello", b"aad").unwrap();
        assert!(matches!(
            cipher.decrypt(&nonce, &ct, b"other"),
            Err(CryptoError::AuthenticationFailure(_))
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let nonce = AeadCipher::generate_nonce();
        let ct = AeadCipher::new(&key()).unwrap().encrypt(&nonce, b"x", b"").unwrap();
        let other = AeadCipher::new(&key()).unwrap();
        assert!(other.decrypt(&nonce, &ct, b"").is_err());
    }

    #[test]
    fn bad_key_size_rejected() {
        assert!(AeadCipher::new(&[0u8; 16]).is_err());
    }

    #[test]
    fn short_inputs_rejected() {
        let cipher = AeadCipher::new(&key()).unwrap();
        assert!(cipher.decrypt(&[0u8; 4], &[0u8; 32], b"").is_err());
        assert!(cipher.decrypt(&[0u8; NONCE_SIZE], &[0u8; 4], b"").is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let cipher = AeadCipher::new(&key()).unwrap();
        assert!(format!("{cipher:?}").contains("REDACTED"));
    }
}
