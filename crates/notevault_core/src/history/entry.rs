//! History entries.

use notevault_model::{ItemContent, Payload};
use serde::{Deserialize, Serialize};

/// Text-length change above which an entry is always kept by optimization.
pub const LARGE_ENTRY_DELTA: i64 = 15;

/// Direction of a text change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOperation {
    /// Text grew or stayed the same length.
    Add,
    /// Text shrank.
    Remove,
}

/// One recorded revision of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemHistoryEntry {
    payload: Payload,
    delta_size: i64,
    operation: HistoryOperation,
}

impl ItemHistoryEntry {
    /// Creates an entry, measuring the change of `text_field` against
    /// `previous`.
    pub fn new(payload: Payload, previous: Option<&ItemHistoryEntry>, text_field: &str) -> Self {
        let length = text_length(payload.decrypted_content(), text_field);
        let previous_length = previous.map_or(0, |entry| {
            text_length(entry.payload.decrypted_content(), text_field)
        });
        let delta_size = length - previous_length;
        let operation = if delta_size < 0 {
            HistoryOperation::Remove
        } else {
            HistoryOperation::Add
        };
        Self {
            payload,
            delta_size,
            operation,
        }
    }

    /// The snapshot.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Signed change in text length relative to the previous entry.
    pub fn delta_size(&self) -> i64 {
        self.delta_size
    }

    /// Whether text was added or removed.
    pub fn operation(&self) -> HistoryOperation {
        self.operation
    }

    /// True if the change exceeds [`LARGE_ENTRY_DELTA`] either way.
    pub fn is_large(&self) -> bool {
        self.delta_size.abs() > LARGE_ENTRY_DELTA
    }

    /// True for a large change that removed text.
    pub fn is_large_removal(&self) -> bool {
        self.is_large() && self.operation == HistoryOperation::Remove
    }

    /// Human-readable summary of the change, such as `+12` or `-40`.
    pub fn delta_label(&self) -> String {
        match self.operation {
            HistoryOperation::Add => format!("+{}", self.delta_size),
            HistoryOperation::Remove => self.delta_size.to_string(),
        }
    }
}

fn text_length(content: Option<&ItemContent>, field: &str) -> i64 {
    content
        .and_then(|content| content.get_str(field))
        .map_or(0, |text| i64::try_from(text.chars().count()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notevault_model::ContentType;

    fn note(text: &str) -> Payload {
        Payload::with_uuid("n", ContentType::Note, ItemContent::with_title_and_text("t", text))
    }

    #[test]
    fn first_entry_measures_full_text() {
        let entry = ItemHistoryEntry::new(note("hello"), None, "text");
        assert_eq!(entry.delta_size(), 5);
        assert_eq!(entry.operation(), HistoryOperation::Add);
        assert_eq!(entry.delta_label(), "+5");
    }

    #[test]
    fn removal_is_negative() {
        let first = ItemHistoryEntry::new(note("a fairly long piece of text here"), None, "text");
        let second = ItemHistoryEntry::new(note("short"), Some(&first), "text");
        assert_eq!(second.operation(), HistoryOperation::Remove);
        assert!(second.is_large_removal());
        assert!(second.delta_label().starts_with('-'));
    }

    #[test]
    fn small_edit_is_not_large() {
        let first = ItemHistoryEntry::new(note("abc"), None, "text");
        let second = ItemHistoryEntry::new(note("abcd"), Some(&first), "text");
        assert!(!second.is_large());
    }

    #[test]
    fn tags_are_sized_by_title() {
        let tag = |title: &str| Payload::with_uuid("t", ContentType::Tag, ItemContent::with_title_and_text(title, ""));
        let first = ItemHistoryEntry::new(tag("work"), None, "title");
        let second = ItemHistoryEntry::new(tag("work and projects for the quarter"), Some(&first), "title");
        assert_eq!(first.delta_size(), 4);
        assert!(second.is_large());
        assert_eq!(ItemHistoryEntry::new(tag("work"), None, "text").delta_size(), 0);
    }
}
