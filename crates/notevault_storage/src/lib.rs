//! # NoteVault Storage
//!
//! Local storage backend trait and implementations for NoteVault.
//!
//! This crate provides the lowest-level persistence abstraction. Backends are
//! **opaque record stores**: they keep raw payload records keyed by uuid and
//! a flat map of raw string values. They never interpret payload contents,
//! never encrypt, and never decide what is discardable.
//!
//! ## Design Principles
//!
//! - Backends are simple record stores (get all, save, remove)
//! - No knowledge of encryption, items, or sync state
//! - Must be `Send + Sync` for shared access
//! - Higher layers own all format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryStorage`] - For testing and ephemeral sessions
//! - [`FileStorage`] - For persistent storage in a directory
//!
//! ## Example
//!
//! ```rust
//! use notevault_storage::{InMemoryStorage, LocalStorage, RawPayload};
//! use serde_json::json;
//!
//! let storage = InMemoryStorage::new();
//! let record = RawPayload::new("abc", json!({"uuid": "abc", "content_type": "Note"}));
//! storage.save_raw_payloads(&[record]).unwrap();
//! assert_eq!(storage.get_all_raw_payloads().unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{LocalStorage, RawPayload};
pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::InMemoryStorage;
