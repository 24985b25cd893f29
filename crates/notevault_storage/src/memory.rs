//! In-memory storage backend for testing.

use crate::backend::{LocalStorage, RawPayload};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory storage backend.
///
/// This backend keeps all records in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral sessions that must leave nothing on disk
///
/// Writes can be made to fail on demand with
/// [`set_reject_writes`](Self::set_reject_writes) to exercise error paths.
///
/// # Example
///
/// ```rust
/// use notevault_storage::{InMemoryStorage, LocalStorage};
///
/// let storage = InMemoryStorage::new();
/// storage.set_raw_value("sync_token", "42").unwrap();
/// assert_eq!(storage.get_raw_value("sync_token").unwrap().as_deref(), Some("42"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    payloads: RwLock<BTreeMap<String, RawPayload>>,
    values: RwLock<BTreeMap<String, String>>,
    reject_writes: AtomicBool,
}

impl InMemoryStorage {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Returns the number of stored payload records.
    #[must_use]
    pub fn payload_count(&self) -> usize {
        self.payloads.read().len()
    }

    /// Returns a copy of all raw values.
    #[must_use]
    pub fn values(&self) -> BTreeMap<String, String> {
        self.values.read().clone()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected("in-memory storage is read-only".into()));
        }
        Ok(())
    }
}

impl LocalStorage for InMemoryStorage {
    fn get_all_raw_payloads(&self) -> StorageResult<Vec<RawPayload>> {
        Ok(self.payloads.read().values().cloned().collect())
    }

    fn save_raw_payloads(&self, payloads: &[RawPayload]) -> StorageResult<()> {
        self.check_writable()?;
        let mut stored = self.payloads.write();
        for payload in payloads {
            stored.insert(payload.uuid.clone(), payload.clone());
        }
        Ok(())
    }

    fn remove_raw_payload_with_id(&self, uuid: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.payloads.write().remove(uuid);
        Ok(())
    }

    fn remove_all_raw_payloads(&self) -> StorageResult<()> {
        self.check_writable()?;
        self.payloads.write().clear();
        Ok(())
    }

    fn get_raw_value(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set_raw_value(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_raw_value(&self, key: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.values.write().remove(key);
        Ok(())
    }

    fn remove_all_raw_values(&self) -> StorageResult<()> {
        self.check_writable()?;
        self.values.write().clear();
        Ok(())
    }
}
