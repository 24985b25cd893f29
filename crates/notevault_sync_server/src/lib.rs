//! # NoteVault Sync Server
//!
//! In-process reference sync server for NoteVault.
//!
//! This crate provides:
//! - An item store with a monotonically increasing sequence per save
//! - Conflict detection (`sync_conflict` on stale `updated_at`, `uuid_conflict`
//!   on uuids owned by another account)
//! - Cursor-paged retrieval
//! - A revision log for server history
//! - Session tokens signed with HMAC-SHA256, revocable to force 401s
//! - [`LoopbackTransport`], which drives the server through the client
//!   transport traits with a JSON round trip
//!
//! # Protocol
//!
//! A sync request saves the client's dirty items, then returns every item
//! saved by other requests since the client's `sync_token`. The server never
//! sees plaintext: items arrive and leave as ciphertext.
//!
//! ```rust,ignore
//! use notevault_sync_server::{LoopbackTransport, ServerConfig, SyncServer};
//! use std::sync::Arc;
//!
//! let server = Arc::new(SyncServer::new(ServerConfig::default()));
//! let token = server.create_session("a@example.org")?;
//! let transport = LoopbackTransport::new(Arc::clone(&server), token);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod loopback;
mod server;
mod store;

pub use auth::TokenValidator;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use loopback::LoopbackTransport;
pub use server::SyncServer;
pub use store::{ItemStore, SaveOutcome, StoredItem};
