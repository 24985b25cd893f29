//! # NoteVault Core
//!
//! Client-side item graph for NoteVault.
//!
//! This crate provides:
//! - [`ItemManager`], the authoritative in-memory index and mutation gateway
//! - Conflict resolution between local and incoming payloads ([`ConflictDelta`])
//! - Singleton enforcement ([`SingletonManager`])
//! - Items-key bookkeeping that feeds the protocol key ring ([`ItemsKeyManager`])
//! - [`StorageService`], which encrypts payloads and values on their way to disk
//! - Backup import ([`Importer`])
//! - Session and server history ([`HistoryManager`])
//!
//! ## Key Invariants
//!
//! - All mutation funnels through [`ItemManager::change_item`] and friends
//! - Observers see consistent state: they run after the index is updated
//! - Deleted items that are no longer dirty leave the index

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod conflict;
mod error;
mod history;
mod import;
mod item_manager;
mod items_keys;
mod observer;
mod reference_index;
mod singleton;
mod storage_service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EncryptionPolicy, HistoryConfig, PersistencePolicy, StoragePolicy};
pub use conflict::{ConflictDelta, ConflictResult, ImportDelta, Origin};
pub use error::{CoreError, CoreResult};
pub use history::{
    DebouncedFlush, HistoryManager, HistoryOperation, HistorySession, ItemHistory,
    ItemHistoryEntry, ServerHistory, LARGE_ENTRY_DELTA,
};
pub use import::{ImportResult, Importer};
pub use item_manager::ItemManager;
pub use items_keys::ItemsKeyManager;
pub use observer::{ContentTypeFilter, ItemsChange, ObserverId};
pub use reference_index::ReferenceIndex;
pub use singleton::SingletonManager;
pub use storage_service::{StorageService, StorageValues, ValueMode, STORAGE_VALUES_KEY};
