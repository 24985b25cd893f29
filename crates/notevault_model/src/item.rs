//! Runtime item projection.

use crate::content::{AppDataKey, ContentReference, ItemContent, APP_DOMAIN};
use crate::content_type::ContentType;
use crate::payload::Payload;
use crate::predicate::Predicate;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;

/// The decrypted, behavior-rich projection of exactly one payload.
///
/// Items are cheap to clone and never change: a new item is built whenever
/// its payload is replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    payload: Arc<Payload>,
}

impl Item {
    /// Wraps a payload.
    pub fn new(payload: Payload) -> Self {
        Self {
            payload: Arc::new(payload),
        }
    }

    /// Returns the underlying payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the uuid.
    pub fn uuid(&self) -> &str {
        &self.payload.uuid
    }

    /// Returns the content type.
    pub fn content_type(&self) -> &ContentType {
        &self.payload.content_type
    }

    /// Returns the decrypted content, if available.
    pub fn content(&self) -> Option<&ItemContent> {
        self.payload.decrypted_content()
    }

    /// Returns the outgoing references.
    pub fn references(&self) -> &[ContentReference] {
        self.content()
            .map(|c| c.references.as_slice())
            .unwrap_or_default()
    }

    /// True if this item references `uuid`.
    pub fn is_referencing(&self, uuid: &str) -> bool {
        self.references().iter().any(|r| r.uuid == uuid)
    }

    /// Returns the title.
    pub fn title(&self) -> Option<&str> {
        self.content().and_then(ItemContent::title)
    }

    /// Returns the text body.
    pub fn text(&self) -> Option<&str> {
        self.content().and_then(ItemContent::text)
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.payload.created_at
    }

    /// Last server update time.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.payload.updated_at
    }

    /// Last user modification, falling back to `updated_at`.
    pub fn user_modified_date(&self) -> DateTime<Utc> {
        self.app_data_value(AppDataKey::UserModifiedDate)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or(self.payload.updated_at, |d| d.with_timezone(&Utc))
    }

    /// Tombstone flag.
    pub fn deleted(&self) -> bool {
        self.payload.deleted
    }

    /// Dirty flag.
    pub fn dirty(&self) -> bool {
        self.payload.dirty
    }

    /// Dirty-generation counter.
    pub fn dirty_count(&self) -> u64 {
        self.payload.dirty_count
    }

    /// Decryption failed.
    pub fn error_decrypting(&self) -> bool {
        self.payload.error_decrypting
    }

    /// Waiting for the wrapping key.
    pub fn waiting_for_key(&self) -> bool {
        self.payload.waiting_for_key
    }

    /// Uuid this item duplicates, if any.
    pub fn duplicate_of(&self) -> Option<&str> {
        self.payload.duplicate_of.as_deref()
    }

    /// Returns an app-data value in the application domain.
    pub fn app_data_value(&self, key: AppDataKey) -> Option<&Value> {
        self.content().and_then(|c| c.app_data_value(key))
    }

    /// Returns an arbitrary domain's data.
    pub fn domain_data(&self, domain: &str) -> Option<&Map<String, Value>> {
        self.content().and_then(|c| c.domain_data(domain))
    }

    fn app_flag(&self, key: AppDataKey) -> bool {
        self.app_data_value(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Pinned flag.
    pub fn pinned(&self) -> bool {
        self.app_flag(AppDataKey::Pinned)
    }

    /// Archived flag.
    pub fn archived(&self) -> bool {
        self.app_flag(AppDataKey::Archived)
    }

    /// Locked flag.
    pub fn locked(&self) -> bool {
        self.app_flag(AppDataKey::Locked)
    }

    /// Trashed flag.
    pub fn trashed(&self) -> bool {
        self.content()
            .and_then(|c| c.get("trashed"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Builds the JSON object predicates are evaluated against.
    ///
    /// Content fields sit at the top level next to payload metadata and the
    /// computed flags; the raw content is also reachable under `content`.
    pub fn predicate_projection(&self) -> Value {
        let mut object = Map::new();
        if let Some(content) = self.content() {
            for (key, value) in &content.fields {
                object.insert(key.clone(), value.clone());
            }
            if let Ok(raw) = serde_json::to_value(content) {
                object.insert("content".into(), raw);
            }
            if let Some(app) = content.domain_data(APP_DOMAIN) {
                object.insert("appData".into(), Value::Object(app.clone()));
            }
        }
        object.insert("uuid".into(), Value::String(self.uuid().to_string()));
        object.insert(
            "content_type".into(),
            Value::String(self.content_type().as_str().to_string()),
        );
        object.insert("created_at".into(), Value::String(self.created_at().to_rfc3339()));
        object.insert("updated_at".into(), Value::String(self.updated_at().to_rfc3339()));
        object.insert(
            "userModifiedDate".into(),
            Value::String(self.user_modified_date().to_rfc3339()),
        );
        object.insert("deleted".into(), Value::Bool(self.deleted()));
        object.insert("pinned".into(), Value::Bool(self.pinned()));
        object.insert("archived".into(), Value::Bool(self.archived()));
        object.insert("locked".into(), Value::Bool(self.locked()));
        object.insert("trashed".into(), Value::Bool(self.trashed()));
        Value::Object(object)
    }

    /// Evaluates `predicate` against this item.
    pub fn satisfies_predicate(&self, predicate: &Predicate) -> bool {
        predicate.evaluate(&self.predicate_projection())
    }
}

impl From<Payload> for Item {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::ComparisonOperator;
    use serde_json::json;

    fn note() -> Item {
        let mut content = ItemContent::with_title_and_text("Hello", "World");
        content.set_app_data_value(AppDataKey::Pinned, json!(true));
        content.set_app_data_value(
            AppDataKey::UserModifiedDate,
            json!("2020-07-01T03:58:31.796Z"),
        );
        Item::new(Payload::new(ContentType::Note, content))
    }

    #[test]
    fn accessors() {
        let item = note();
        assert_eq!(item.title(), Some("Hello"));
        assert_eq!(item.text(), Some("World"));
        assert!(item.pinned());
        assert!(!item.archived());
        assert!(!item.trashed());
        assert_eq!(
            item.user_modified_date().to_rfc3339(),
            "2020-07-01T03:58:31.796+00:00"
        );
    }

    #[test]
    fn user_modified_date_falls_back() {
        let item = Item::new(Payload::new(ContentType::Note, ItemContent::new()));
        assert_eq!(item.user_modified_date(), item.updated_at());
    }

    #[test]
    fn predicates_see_computed_flags() {
        let item = note();
        assert!(item.satisfies_predicate(&Predicate::new(
            "pinned",
            ComparisonOperator::Equal,
            json!(true)
        )));
        assert!(item.satisfies_predicate(&Predicate::new(
            "title",
            ComparisonOperator::StartsWith,
            json!("He")
        )));
        assert!(item.satisfies_predicate(&Predicate::new(
            "content_type",
            ComparisonOperator::Equal,
            json!("Note")
        )));
    }

    #[test]
    fn encrypted_item_has_no_content() {
        let mut payload = Payload::new(ContentType::Note, ItemContent::new());
        payload.content = Some(crate::payload::Content::Encrypted("004:...".into()));
        let item = Item::new(payload);
        assert!(item.content().is_none());
        assert!(item.references().is_empty());
    }
}
