//! # NoteVault Sync Engine
//!
//! Client-side sync for NoteVault.
//!
//! This crate provides:
//! - [`SyncCoordinator`], which runs sync operations as bounded rounds of
//!   upload, download and reconciliation
//! - An explicit [`SyncStateMachine`] guarding round transitions
//! - [`SyncEvent`]s for hosts that want to react to outcomes
//! - [`AccountDownloader`] for full-account downloads outside the token flow
//!
//! ## Key Invariants
//!
//! - Tokens advance only after a round's payloads reached local storage
//! - Items edited while their batch was in flight stay dirty
//! - Items keys upload before the items they wrap
//! - A failed round leaves every dirty item dirty
//!
//! ```rust,ignore
//! let coordinator = SyncCoordinator::new(SyncConfig::default(), items, protocol, storage)
//!     .with_transport(transport);
//! coordinator.load_local_items()?;
//! let outcome = coordinator.sync()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod coordinator;
mod downloader;
mod error;
mod events;
mod state;

pub use config::SyncConfig;
pub use coordinator::{SyncCoordinator, SyncOutcome, CURSOR_TOKEN_KEY, SYNC_TOKEN_KEY};
pub use downloader::AccountDownloader;
pub use error::{SyncError, SyncResult};
pub use events::{SyncEvent, SyncEventFeed};
pub use state::{SyncState, SyncStateMachine};
