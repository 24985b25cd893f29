//! Server history.

use super::item_history::ItemHistory;
use notevault_model::{Payload, PayloadSource};

/// Revisions of one item as fetched from the server.
///
/// Rebuilt on every fetch and never persisted.
#[derive(Debug, Clone, Default)]
pub struct ServerHistory {
    item_uuid: String,
    history: ItemHistory,
}

impl ServerHistory {
    /// Folds decrypted revisions into a history, oldest first, sizing
    /// changes by `text_field`.
    ///
    /// Revisions that failed to decrypt are skipped.
    pub fn from_revisions(item_uuid: impl Into<String>, mut revisions: Vec<Payload>, text_field: &str) -> Self {
        let item_uuid = item_uuid.into();
        revisions.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));

        let mut history = ItemHistory::new();
        for mut revision in revisions {
            if revision.error_decrypting {
                continue;
            }
            revision.uuid.clone_from(&item_uuid);
            revision.source = PayloadSource::ServerHistory;
            history.add_history_entry_for_item(revision, text_field);
        }
        Self { item_uuid, history }
    }

    /// The item these revisions belong to.
    pub fn item_uuid(&self) -> &str {
        &self.item_uuid
    }

    /// The folded history.
    pub fn history(&self) -> &ItemHistory {
        &self.history
    }

    /// Consumes the wrapper.
    pub fn into_history(self) -> ItemHistory {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use notevault_model::{ContentType, ItemContent};

    #[test]
    fn revisions_are_sorted_ascending() {
        let now = Utc::now();
        let mut newer = Payload::with_uuid("r2", ContentType::Note, ItemContent::with_title_and_text("t", "second"));
        newer.updated_at = now;
        let mut older = Payload::with_uuid("r1", ContentType::Note, ItemContent::with_title_and_text("t", "first"));
        older.updated_at = now - Duration::minutes(5);
        let mut broken = older.clone();
        broken.error_decrypting = true;

        let server = ServerHistory::from_revisions("item", vec![newer, broken, older], "text");

        let texts: Vec<&str> = server
            .history()
            .entries()
            .iter()
            .filter_map(|e| e.payload().decrypted_content().and_then(ItemContent::text))
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert!(server.history().entries().iter().all(|e| e.payload().uuid == "item"));
    }
}
