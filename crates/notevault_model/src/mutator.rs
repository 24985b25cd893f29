//! The mutation contract.
//!
//! An [`ItemMutator`] starts from a copy of an item's payload, collects
//! changes, and produces a replacement payload in [`ItemMutator::finish`].
//! The mutation kind decides how dirty markers move.

use crate::content::{AppDataKey, ContentReference, ItemContent, APP_DOMAIN};
use crate::error::{ModelError, ModelResult};
use crate::item::Item;
use crate::payload::{Content, Payload};
use crate::source::PayloadSource;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    /// A user edit: marks dirty and bumps the user-modified date.
    UserInteraction = 1,
    /// A system edit such as a migration: marks dirty only.
    Internal = 2,
    /// Bookkeeping that must not mark the item dirty.
    NonDirtying = 3,
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationType::UserInteraction => "UserInteraction",
            MutationType::Internal => "Internal",
            MutationType::NonDirtying => "NonDirtying",
        };
        f.write_str(name)
    }
}

/// Collects changes to one item.
#[derive(Debug)]
pub struct ItemMutator {
    payload: Payload,
    mutation_type: MutationType,
    content_changed: bool,
    user_modified_date_set: bool,
    clear_dirty: bool,
    error: Option<ModelError>,
}

impl ItemMutator {
    /// Starts a mutation of `item`.
    pub fn new(item: &Item, mutation_type: MutationType) -> Self {
        Self {
            payload: item.payload().clone(),
            mutation_type,
            content_changed: false,
            user_modified_date_set: false,
            clear_dirty: false,
            error: None,
        }
    }

    /// Uuid being mutated.
    pub fn uuid(&self) -> &str {
        &self.payload.uuid
    }

    /// Mutation kind.
    pub fn mutation_type(&self) -> MutationType {
        self.mutation_type
    }

    /// Current working content.
    pub fn content(&self) -> Option<&ItemContent> {
        self.payload.decrypted_content()
    }

    /// Applies `f` to the working content.
    ///
    /// Recording an error instead of panicking keeps closures passed to
    /// `change_item` simple; the error surfaces from [`finish`](Self::finish).
    pub fn edit_content(&mut self, f: impl FnOnce(&mut ItemContent)) {
        match &mut self.payload.content {
            Some(Content::Decrypted(content)) => {
                f(content);
                self.content_changed = true;
            }
            _ => {
                if self.error.is_none() {
                    self.error = Some(ModelError::invalid_content(format!(
                        "item {} has no decrypted content",
                        self.payload.uuid
                    )));
                }
            }
        }
    }

    /// Sets a content field.
    pub fn set_field(&mut self, key: &str, value: Value) {
        self.edit_content(|c| c.set(key, value));
    }

    /// Sets the title.
    pub fn set_title(&mut self, title: impl Into<String>) {
        let title = title.into();
        self.edit_content(|c| c.set("title", Value::String(title)));
    }

    /// Sets the text body.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.edit_content(|c| c.set("text", Value::String(text)));
    }

    /// Marks the item deleted and clears its content.
    pub fn set_deleted(&mut self) {
        self.payload.deleted = true;
        if self.payload.decrypted_content().is_some() {
            self.payload.content = Some(Content::Decrypted(ItemContent::new()));
            self.content_changed = true;
        }
    }

    /// Records when a sync including this item started and resets the dirty counter.
    pub fn set_last_sync_began(&mut self, at: DateTime<Utc>) {
        self.payload.last_sync_began = Some(at);
        self.payload.dirty_count = 0;
    }

    /// Records when a sync including this item ended.
    pub fn set_last_sync_end(&mut self, at: DateTime<Utc>) {
        self.payload.last_sync_end = Some(at);
    }

    /// Sets the decryption error flag.
    pub fn set_error_decrypting(&mut self, value: bool) {
        self.payload.error_decrypting = value;
    }

    /// Sets the waiting-for-key flag.
    pub fn set_waiting_for_key(&mut self, value: bool) {
        self.payload.waiting_for_key = value;
    }

    /// Sets the server update time.
    pub fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.payload.updated_at = at;
    }

    /// Sets the user-modified date explicitly.
    pub fn set_user_modified_date(&mut self, at: DateTime<Utc>) {
        let value = Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true));
        self.edit_content(|c| c.set_app_data_value(AppDataKey::UserModifiedDate, value));
        self.user_modified_date_set = true;
    }

    /// Sets the pinned flag.
    pub fn set_pinned(&mut self, pinned: bool) {
        self.set_app_data_item(AppDataKey::Pinned, Value::Bool(pinned));
    }

    /// Sets the archived flag.
    pub fn set_archived(&mut self, archived: bool) {
        self.set_app_data_item(AppDataKey::Archived, Value::Bool(archived));
    }

    /// Sets the locked flag.
    pub fn set_locked(&mut self, locked: bool) {
        self.set_app_data_item(AppDataKey::Locked, Value::Bool(locked));
    }

    /// Sets the trashed flag.
    pub fn set_trashed(&mut self, trashed: bool) {
        self.set_field("trashed", Value::Bool(trashed));
    }

    /// Replaces a domain's data.
    pub fn set_domain_data(&mut self, domain: &str, data: Map<String, Value>) {
        self.edit_content(|c| c.set_domain_data(domain, data));
    }

    /// Sets one key of a domain's data.
    pub fn set_domain_data_key(&mut self, domain: &str, key: &str, value: Value) {
        self.edit_content(|c| c.set_domain_value(domain, key, value));
    }

    /// Sets one key of the application's app data.
    pub fn set_app_data_item(&mut self, key: AppDataKey, value: Value) {
        self.set_domain_data_key(APP_DOMAIN, key.as_str(), value);
    }

    /// Adds a reference to `item`.
    pub fn add_item_as_relationship(&mut self, item: &Item) {
        let reference = ContentReference::new(item.uuid(), item.content_type().clone());
        self.edit_content(|c| c.add_reference(reference));
    }

    /// Removes any reference to `uuid`.
    pub fn remove_item_as_relationship(&mut self, uuid: &str) {
        self.edit_content(|c| c.remove_reference(uuid));
    }

    /// Rewrites references to `old_uuid` so they point at `new_uuid`.
    pub fn replace_reference(&mut self, old_uuid: &str, new_uuid: &str) {
        self.edit_content(|c| {
            for reference in &mut c.references {
                if reference.uuid == old_uuid {
                    reference.uuid = new_uuid.to_string();
                }
            }
            let mut seen = std::collections::HashSet::new();
            c.references.retain(|r| seen.insert(r.uuid.clone()));
        });
    }

    /// Clears dirty markers. Only meaningful for non-dirtying mutations.
    pub fn clear_dirty(&mut self) {
        self.clear_dirty = true;
    }

    /// Produces the replacement payload.
    ///
    /// # Errors
    ///
    /// Returns an error if an edit targeted missing content, or if a
    /// non-dirtying mutation changed content.
    pub fn finish(mut self, now: DateTime<Utc>) -> ModelResult<Payload> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }

        match self.mutation_type {
            MutationType::NonDirtying => {
                if self.content_changed {
                    return Err(ModelError::InvalidMutationType {
                        mutation_type: self.mutation_type.to_string(),
                        message: format!("content of {} changed", self.payload.uuid),
                    });
                }
                if self.clear_dirty {
                    self.payload.dirty = false;
                    self.payload.dirtied_date = None;
                }
            }
            MutationType::UserInteraction => {
                if !self.user_modified_date_set && self.payload.decrypted_content().is_some() {
                    let stamp = Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true));
                    if let Some(Content::Decrypted(content)) = &mut self.payload.content {
                        content.set_app_data_value(AppDataKey::UserModifiedDate, stamp);
                    }
                }
                self.payload = self.payload.with_dirty(now);
            }
            MutationType::Internal => {
                self.payload = self.payload.with_dirty(now);
            }
        }

        self.payload.source = PayloadSource::LocalChanged;
        Ok(self.payload)
    }
}
