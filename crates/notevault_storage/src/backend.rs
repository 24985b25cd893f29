//! Local storage trait definition.

use crate::error::StorageResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw payload record as held by a backend.
///
/// The body is whatever JSON object the caller serialized; backends only use
/// the uuid as the record key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    /// Record key.
    pub uuid: String,
    /// Serialized payload body.
    pub body: Value,
}

impl RawPayload {
    /// Creates a new raw record.
    pub fn new(uuid: impl Into<String>, body: Value) -> Self {
        Self {
            uuid: uuid.into(),
            body,
        }
    }
}

/// A local storage backend for NoteVault.
///
/// Backends persist two independent namespaces:
/// - raw payload records keyed by uuid
/// - raw string values keyed by name (sync tokens, history blobs, flags)
///
/// # Invariants
///
/// - `save_raw_payloads` upserts: a record with an existing uuid replaces it
/// - `get_all_raw_payloads` returns every record previously saved and not removed
/// - removal of an unknown key is not an error
///
/// # Implementors
///
/// - [`super::InMemoryStorage`] - For testing
/// - [`super::FileStorage`] - For persistent storage
pub trait LocalStorage: Send + Sync {
    /// Returns all stored payload records.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read.
    fn get_all_raw_payloads(&self) -> StorageResult<Vec<RawPayload>>;

    /// Saves payload records, replacing any with the same uuid.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. On error no guarantee is made
    /// about which records were written.
    fn save_raw_payloads(&self, payloads: &[RawPayload]) -> StorageResult<()>;

    /// Removes the payload record with the given uuid.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove_raw_payload_with_id(&self, uuid: &str) -> StorageResult<()>;

    /// Removes every payload record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove_all_raw_payloads(&self) -> StorageResult<()>;

    /// Reads a raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value store cannot be read.
    fn get_raw_value(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes a raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set_raw_value(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes a raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove_raw_value(&self, key: &str) -> StorageResult<()>;

    /// Removes every raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove_all_raw_values(&self) -> StorageResult<()>;
}
