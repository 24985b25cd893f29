//! # NoteVault Protocol
//!
//! Versioned end-to-end encryption for NoteVault payloads.
//!
//! This crate provides:
//! - Protocol versions 001 through 004 behind one [`ProtocolVersion`] tag
//! - Root key derivation from identifier, password and [`KeyParams`]
//! - Per-item content keys wrapped under an items key or the root key
//! - Payload encryption and decryption for a given [`EncryptionIntent`]
//! - [`ProtocolService`], which owns the root key and the items-key ring
//!
//! ## Formats
//!
//! | Version | Content string | Cipher |
//! |---|---|---|
//! | 001 | `001<base64>` with a detached `auth_hash` | AES-256-CBC + HMAC-SHA256 |
//! | 002 | `002:mac:uuid:iv:ciphertext` | AES-256-CBC + HMAC-SHA256 |
//! | 003 | `003:mac:uuid:iv:ciphertext:keyParams` | AES-256-CBC + HMAC-SHA256 |
//! | 004 | `004:nonce:ciphertext:aad` | AES-256-GCM |
//!
//! ## Failure model
//!
//! Authentication failures and missing keys are recorded on the returned
//! payload (`error_decrypting`, `waiting_for_key`). Only structurally
//! malformed input and unknown versions are returned as errors.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aead;
mod error;
mod intent;
mod key_params;
mod keys;
mod operator;
mod primitives;
mod service;
mod version;

pub use aead::{AeadCipher, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use intent::EncryptionIntent;
pub use key_params::KeyParams;
pub use keys::{ItemsKeyMaterial, RootKey, WrappingKey};
pub use operator::{EncryptedParameters, Operator};
pub use primitives::constant_time_eq;
pub use service::{DecryptedBatch, ProtocolService};
pub use version::ProtocolVersion;
