//! Smart tags.

use crate::content_type::ContentType;
use crate::item::Item;
use crate::predicate::{ComparisonOperator, Predicate};
use serde_json::json;

/// Built-in smart tags that every account has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemSmartTag {
    /// Every note not archived or trashed.
    AllNotes,
    /// Archived notes not in the trash.
    ArchivedNotes,
    /// Trashed notes.
    TrashedNotes,
}

impl SystemSmartTag {
    /// All system tags in display order.
    pub const ALL: [SystemSmartTag; 3] = [
        SystemSmartTag::AllNotes,
        SystemSmartTag::ArchivedNotes,
        SystemSmartTag::TrashedNotes,
    ];

    /// Fixed uuid of the tag.
    pub fn uuid(&self) -> &'static str {
        match self {
            SystemSmartTag::AllNotes => "all-notes",
            SystemSmartTag::ArchivedNotes => "archived-notes",
            SystemSmartTag::TrashedNotes => "trashed-notes",
        }
    }

    /// Display title.
    pub fn title(&self) -> &'static str {
        match self {
            SystemSmartTag::AllNotes => "All notes",
            SystemSmartTag::ArchivedNotes => "Archived",
            SystemSmartTag::TrashedNotes => "Trash",
        }
    }

    /// Membership predicate.
    pub fn predicate(&self) -> Predicate {
        let is_note = Predicate::new(
            "content_type",
            ComparisonOperator::Equal,
            json!(ContentType::Note.as_str()),
        );
        let trashed = Predicate::new("trashed", ComparisonOperator::Equal, json!(true));
        let archived = Predicate::new("archived", ComparisonOperator::Equal, json!(true));
        match self {
            SystemSmartTag::AllNotes => Predicate::and(vec![
                is_note,
                Predicate::not(trashed),
                Predicate::not(archived),
            ]),
            SystemSmartTag::ArchivedNotes => {
                Predicate::and(vec![is_note, archived, Predicate::not(trashed)])
            }
            SystemSmartTag::TrashedNotes => Predicate::and(vec![is_note, trashed]),
        }
    }

    /// Looks up a system tag by uuid.
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.uuid() == uuid)
    }

    /// Reads the predicate stored in a user smart tag's content.
    pub fn predicate_of(item: &Item) -> Option<Predicate> {
        if item.content_type() != &ContentType::SmartTag {
            return None;
        }
        let raw = item.content()?.get("predicate")?.clone();
        serde_json::from_value(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{AppDataKey, ItemContent};
    use crate::payload::Payload;

    fn note(archived: bool, trashed: bool) -> Item {
        let mut content = ItemContent::with_title_and_text("n", "");
        content.set_app_data_value(AppDataKey::Archived, json!(archived));
        content.set("trashed", json!(trashed));
        Item::new(Payload::new(ContentType::Note, content))
    }

    #[test]
    fn system_tag_membership() {
        let plain = note(false, false);
        let archived = note(true, false);
        let trashed = note(false, true);

        let all = SystemSmartTag::AllNotes.predicate();
        assert!(plain.satisfies_predicate(&all));
        assert!(!archived.satisfies_predicate(&all));
        assert!(!trashed.satisfies_predicate(&all));

        assert!(archived.satisfies_predicate(&SystemSmartTag::ArchivedNotes.predicate()));
        assert!(trashed.satisfies_predicate(&SystemSmartTag::TrashedNotes.predicate()));
        assert!(!plain.satisfies_predicate(&SystemSmartTag::TrashedNotes.predicate()));
    }

    #[test]
    fn lookup_by_uuid() {
        assert_eq!(
            SystemSmartTag::from_uuid("trashed-notes"),
            Some(SystemSmartTag::TrashedNotes)
        );
        assert_eq!(SystemSmartTag::from_uuid("nope"), None);
    }

    #[test]
    fn user_smart_tag_predicate() {
        let mut content = ItemContent::new();
        content.set("title", json!("Pinned"));
        content.set(
            "predicate",
            json!({"keypath": "pinned", "operator": "=", "value": true}),
        );
        let tag = Item::new(Payload::new(ContentType::SmartTag, content));
        let predicate = SystemSmartTag::predicate_of(&tag).unwrap();

        let mut pinned = ItemContent::new();
        pinned.set_app_data_value(AppDataKey::Pinned, json!(true));
        let pinned = Item::new(Payload::new(ContentType::Note, pinned));
        assert!(pinned.satisfies_predicate(&predicate));
    }
}
