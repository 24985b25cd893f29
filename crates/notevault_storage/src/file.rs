//! Directory-backed storage for persistent sessions.

use crate::backend::{LocalStorage, RawPayload};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const PAYLOADS_FILE: &str = "payloads.json";
const VALUES_FILE: &str = "values.json";

/// A directory-backed storage backend.
///
/// Layout:
///
/// ```text
/// <dir>/
///   LOCK            exclusive advisory lock held while open
///   payloads.json   { uuid: payload body }
///   values.json     { key: value }
/// ```
///
/// Records are cached in memory and every write rewrites the affected file
/// through a temporary file followed by a rename, so a crash never leaves a
/// half-written document behind.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    payloads: RwLock<BTreeMap<String, Value>>,
    values: RwLock<BTreeMap<String, String>>,
    _lock_file: File,
}

impl FileStorage {
    /// Opens (creating if needed) a storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, another process
    /// holds the lock, or the existing documents are corrupted.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(StorageError::corrupted(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        let payloads: BTreeMap<String, Value> = read_document(&path.join(PAYLOADS_FILE))?;
        let values: BTreeMap<String, String> = read_document(&path.join(VALUES_FILE))?;
        tracing::debug!(
            path = %path.display(),
            payloads = payloads.len(),
            values = values.len(),
            "opened file storage"
        );

        Ok(Self {
            path: path.to_path_buf(),
            payloads: RwLock::new(payloads),
            values: RwLock::new(values),
            _lock_file: lock_file,
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_payloads(&self, payloads: &BTreeMap<String, Value>) -> StorageResult<()> {
        write_document(&self.path.join(PAYLOADS_FILE), payloads)
    }

    fn write_values(&self, values: &BTreeMap<String, String>) -> StorageResult<()> {
        write_document(&self.path.join(VALUES_FILE), values)
    }
}

fn read_document<T: serde::de::DeserializeOwned + Default>(path: &Path) -> StorageResult<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| StorageError::corrupted(format!("{}: {e}", path.display())))
}

fn write_document<T: serde::Serialize>(path: &Path, document: &T) -> StorageResult<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        serde_json::to_writer(&mut file, document)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

impl LocalStorage for FileStorage {
    fn get_all_raw_payloads(&self) -> StorageResult<Vec<RawPayload>> {
        Ok(self
            .payloads
            .read()
            .iter()
            .map(|(uuid, body)| RawPayload::new(uuid.clone(), body.clone()))
            .collect())
    }

    fn save_raw_payloads(&self, payloads: &[RawPayload]) -> StorageResult<()> {
        let mut stored = self.payloads.write();
        for payload in payloads {
            stored.insert(payload.uuid.clone(), payload.body.clone());
        }
        self.write_payloads(&stored)
    }

    fn remove_raw_payload_with_id(&self, uuid: &str) -> StorageResult<()> {
        let mut stored = self.payloads.write();
        if stored.remove(uuid).is_some() {
            self.write_payloads(&stored)?;
        }
        Ok(())
    }

    fn remove_all_raw_payloads(&self) -> StorageResult<()> {
        let mut stored = self.payloads.write();
        stored.clear();
        self.write_payloads(&stored)
    }

    fn get_raw_value(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set_raw_value(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value.to_string());
        self.write_values(&values)
    }

    fn remove_raw_value(&self, key: &str) -> StorageResult<()> {
        let mut values = self.values.write();
        if values.remove(key).is_some() {
            self.write_values(&values)?;
        }
        Ok(())
    }

    fn remove_all_raw_values(&self) -> StorageResult<()> {
        let mut values = self.values.write();
        values.clear();
        self.write_values(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn fresh_directory_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault");
        let storage = FileStorage::open(&path).unwrap();
        assert!(storage.get_all_raw_payloads().unwrap().is_empty());
        assert_eq!(storage.get_raw_value("sync_token").unwrap(), None);
        assert!(path.join(LOCK_FILE).exists());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let storage = FileStorage::open(dir.path()).unwrap();
            storage
                .save_raw_payloads(&[RawPayload::new("a", json!({"uuid": "a"}))])
                .unwrap();
            storage.set_raw_value("sync_token", "7").unwrap();
        }

        let storage = FileStorage::open(dir.path()).unwrap();
        assert_eq!(storage.get_all_raw_payloads().unwrap().len(), 1);
        assert_eq!(
            storage.get_raw_value("sync_token").unwrap().as_deref(),
            Some("7")
        );
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = FileStorage::open(dir.path()).unwrap();
        let second = FileStorage::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[test]
    fn removal_is_persisted() {
        let dir = tempdir().unwrap();
        {
            let storage = FileStorage::open(dir.path()).unwrap();
            storage
                .save_raw_payloads(&[
                    RawPayload::new("a", json!({"uuid": "a"})),
                    RawPayload::new("b", json!({"uuid": "b"})),
                ])
                .unwrap();
            storage.remove_raw_payload_with_id("a").unwrap();
            storage.set_raw_value("x", "1").unwrap();
            storage.remove_all_raw_values().unwrap();
        }

        let storage = FileStorage::open(dir.path()).unwrap();
        let all = storage.get_all_raw_payloads().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uuid, "b");
        assert_eq!(storage.get_raw_value("x").unwrap(), None);
    }

    #[test]
    fn corrupted_document_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(PAYLOADS_FILE), b"{not json").unwrap();
        let result = FileStorage::open(dir.path());
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }
}
