//! Per-item revision log.

use super::entry::ItemHistoryEntry;
use notevault_model::{AppDataKey, Payload};
use serde::{Deserialize, Serialize};

/// Ordered revisions of one item, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemHistory {
    entries: Vec<ItemHistoryEntry>,
}

impl ItemHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> &[ItemHistoryEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent entry.
    pub fn latest(&self) -> Option<&ItemHistoryEntry> {
        self.entries.last()
    }

    /// Appends a snapshot of `payload`, sizing the change by `text_field`.
    ///
    /// Returns `None` when the content equals the latest entry's or the
    /// payload has no plaintext.
    pub fn add_history_entry_for_item(&mut self, payload: Payload, text_field: &str) -> Option<&ItemHistoryEntry> {
        let content = payload.decrypted_content()?;
        if let Some(latest) = self.entries.last().and_then(|e| e.payload().decrypted_content()) {
            let ignored = [AppDataKey::UserModifiedDate.as_str()];
            if latest.equals_ignoring(content, &[], &ignored, false) {
                return None;
            }
        }
        let entry = ItemHistoryEntry::new(payload, self.entries.last(), text_field);
        self.entries.push(entry);
        self.entries.last()
    }

    /// Drops entries not worth keeping. Returns how many were removed.
    ///
    /// The first and last entries always survive, as does every large
    /// change. A large removal also keeps the entry before it so the removed
    /// text stays recoverable.
    pub fn optimize(&mut self) -> usize {
        let count = self.entries.len();
        if count <= 2 {
            return 0;
        }

        let mut keep = vec![false; count];
        keep[0] = true;
        keep[count - 1] = true;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.is_large() {
                keep[index] = true;
                if entry.is_large_removal() && index > 0 {
                    keep[index - 1] = true;
                }
            }
        }

        let mut flags = keep.into_iter();
        self.entries.retain(|_| flags.next().unwrap_or(true));
        count - self.entries.len()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
