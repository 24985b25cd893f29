//! Decrypted item content.

use crate::content_type::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Domain key under which the application keeps its own app data.
pub const APP_DOMAIN: &str = "org.standardnotes.sn";

/// Well-known keys inside the application's app-data domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppDataKey {
    /// Item is pinned.
    Pinned,
    /// Item is archived.
    Archived,
    /// Item is locked against edits.
    Locked,
    /// Last time a user (not the system) changed the item.
    UserModifiedDate,
    /// Uuid this item was duplicated from during a conflict.
    ConflictOf,
}

impl AppDataKey {
    /// Returns the JSON key.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppDataKey::Pinned => "pinned",
            AppDataKey::Archived => "archived",
            AppDataKey::Locked => "locked",
            AppDataKey::UserModifiedDate => "client_updated_at",
            AppDataKey::ConflictOf => "conflict_of",
        }
    }
}

/// A reference from one item to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReference {
    /// Referenced uuid.
    pub uuid: String,
    /// Referenced item's content type.
    pub content_type: ContentType,
}

impl ContentReference {
    /// Creates a reference.
    pub fn new(uuid: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            uuid: uuid.into(),
            content_type,
        }
    }
}

/// The structured plaintext record carried by a decrypted payload.
///
/// `references` and `appData` are modelled explicitly; every other key is
/// kept verbatim in `fields` so unknown content survives round trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemContent {
    /// Outgoing references.
    #[serde(default)]
    pub references: Vec<ContentReference>,
    /// Per-domain application data.
    #[serde(rename = "appData", default)]
    pub app_data: Map<String, Value>,
    /// Remaining content fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ItemContent {
    /// Creates empty content.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates content with the given title and text.
    pub fn with_title_and_text(title: impl Into<String>, text: impl Into<String>) -> Self {
        let mut content = Self::new();
        content.set("title", Value::String(title.into()));
        content.set("text", Value::String(text.into()));
        content
    }

    /// Returns a content field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Sets a content field.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Removes a content field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Returns a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Returns the title, if any.
    pub fn title(&self) -> Option<&str> {
        self.get_str("title")
    }

    /// Returns the text body, if any.
    pub fn text(&self) -> Option<&str> {
        self.get_str("text")
    }

    /// Returns the data stored under `domain`.
    pub fn domain_data(&self, domain: &str) -> Option<&Map<String, Value>> {
        self.app_data.get(domain).and_then(Value::as_object)
    }

    /// Replaces the data stored under `domain`.
    pub fn set_domain_data(&mut self, domain: &str, data: Map<String, Value>) {
        self.app_data.insert(domain.to_string(), Value::Object(data));
    }

    /// Returns one key of a domain's data.
    pub fn domain_value(&self, domain: &str, key: &str) -> Option<&Value> {
        self.domain_data(domain).and_then(|data| data.get(key))
    }

    /// Sets one key of a domain's data.
    pub fn set_domain_value(&mut self, domain: &str, key: &str, value: Value) {
        let entry = self
            .app_data
            .entry(domain.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(data) = entry {
            data.insert(key.to_string(), value);
        }
    }

    /// Returns an application app-data value.
    pub fn app_data_value(&self, key: AppDataKey) -> Option<&Value> {
        self.domain_value(APP_DOMAIN, key.as_str())
    }

    /// Sets an application app-data value.
    pub fn set_app_data_value(&mut self, key: AppDataKey, value: Value) {
        self.set_domain_value(APP_DOMAIN, key.as_str(), value);
    }

    /// True if the content references `uuid`.
    pub fn has_reference(&self, uuid: &str) -> bool {
        self.references.iter().any(|r| r.uuid == uuid)
    }

    /// Adds a reference unless it is already present.
    pub fn add_reference(&mut self, reference: ContentReference) {
        if !self.has_reference(&reference.uuid) {
            self.references.push(reference);
        }
    }

    /// Removes any reference to `uuid`.
    pub fn remove_reference(&mut self, uuid: &str) {
        self.references.retain(|r| r.uuid != uuid);
    }

    /// Unions `other`'s references into this content, preserving order.
    pub fn merge_references(&mut self, other: &ItemContent) {
        for reference in &other.references {
            self.add_reference(reference.clone());
        }
    }

    /// Compares two contents, skipping the given keys.
    ///
    /// Reference order is irrelevant. `ignore_references` drops references
    /// from the comparison entirely.
    pub fn equals_ignoring(
        &self,
        other: &ItemContent,
        content_keys: &[&str],
        app_data_keys: &[&str],
        ignore_references: bool,
    ) -> bool {
        self.comparable(content_keys, app_data_keys, ignore_references)
            == other.comparable(content_keys, app_data_keys, ignore_references)
    }

    fn comparable(
        &self,
        content_keys: &[&str],
        app_data_keys: &[&str],
        ignore_references: bool,
    ) -> Value {
        let mut fields = self.fields.clone();
        for key in content_keys {
            fields.remove(*key);
        }

        let mut app_data = self.app_data.clone();
        if let Some(Value::Object(domain)) = app_data.get_mut(APP_DOMAIN) {
            for key in app_data_keys {
                domain.remove(*key);
            }
            if domain.is_empty() {
                app_data.remove(APP_DOMAIN);
            }
        }

        let mut object = Map::new();
        object.insert("fields".into(), Value::Object(fields));
        object.insert("appData".into(), Value::Object(app_data));
        if !ignore_references {
            let mut uuids: Vec<&str> = self.references.iter().map(|r| r.uuid.as_str()).collect();
            uuids.sort_unstable();
            uuids.dedup();
            object.insert(
                "references".into(),
                Value::Array(uuids.into_iter().map(|u| Value::String(u.into())).collect()),
            );
        }
        Value::Object(object)
    }
}
