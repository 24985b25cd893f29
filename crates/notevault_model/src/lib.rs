//! # NoteVault Model
//!
//! Payload and item data model for NoteVault.
//!
//! This crate provides:
//! - [`Payload`], the immutable wire/storage envelope for one item
//! - [`Item`], the decrypted runtime projection of one payload
//! - [`ItemMutator`], the only way to derive a changed payload from an item
//! - A capability registry ([`PolicyRegistry`]) keyed by [`ContentType`] that
//!   supplies equality-ignore keys, singleton predicates and conflict strategy
//! - [`Predicate`] evaluation for singletons and smart tags
//!
//! ## Key Invariants
//!
//! - Items never mutate their payload in place
//! - A payload with `deleted = true` and `dirty = false` is discardable
//! - Every dirtying mutation advances the payload's dirty counter

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod content;
mod content_type;
mod error;
mod item;
mod mutator;
mod payload;
mod policy;
mod predicate;
mod smart_tag;
mod source;

pub use collection::PayloadCollection;
pub use content::{AppDataKey, ContentReference, ItemContent, APP_DOMAIN};
pub use content_type::ContentType;
pub use error::{ModelError, ModelResult};
pub use item::Item;
pub use mutator::{ItemMutator, MutationType};
pub use payload::{generate_uuid, Content, Payload};
pub use policy::{
    ConflictStrategy, ContentTypePolicy, PolicyRegistry, SingletonPolicy, SingletonStrategy,
    DEFAULT_HISTORY_TEXT_FIELD,
};
pub use predicate::{ComparisonOperator, CompoundOperator, Predicate};
pub use smart_tag::SystemSmartTag;
pub use source::PayloadSource;
