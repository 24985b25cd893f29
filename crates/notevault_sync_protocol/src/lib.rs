//! # NoteVault Sync Protocol
//!
//! Wire messages and transport traits for NoteVault sync.
//!
//! This crate provides:
//! - [`ServerPayload`], the wire projection of a payload
//! - [`SyncRequest`] / [`SyncResponse`] with saved, retrieved and conflicting items
//! - Revision listings for server-side history
//! - [`SyncTransport`] and [`RevisionTransport`] traits plus a [`MockTransport`]
//!
//! Messages are encoded as JSON. This is a pure protocol crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod transport;

pub use error::{TransportError, TransportResult};
pub use messages::{
    ConflictEntry, ConflictType, ResponseError, RevisionSummary, ServerPayload, SyncRequest,
    SyncResponse, UnsavedEntry, API_VERSION,
};
pub use transport::{MockTransport, RevisionTransport, SyncTransport};
