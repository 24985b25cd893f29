//! Session history.

use super::entry::ItemHistoryEntry;
use super::item_history::ItemHistory;
use notevault_model::Payload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_ITEM_REVISION_THRESHOLD: usize = 60;

fn default_threshold() -> usize {
    DEFAULT_ITEM_REVISION_THRESHOLD
}

/// Revisions recorded during this and, when persisted, earlier sessions.
///
/// The only history that is written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySession {
    #[serde(rename = "itemUUIDToItemHistoryMapping", default)]
    histories: BTreeMap<String, ItemHistory>,
    #[serde(skip, default = "default_threshold")]
    item_revision_threshold: usize,
}

impl Default for HistorySession {
    fn default() -> Self {
        Self::new(DEFAULT_ITEM_REVISION_THRESHOLD)
    }
}

impl HistorySession {
    /// Creates an empty session that optimizes items above `threshold` entries.
    pub fn new(threshold: usize) -> Self {
        Self {
            histories: BTreeMap::new(),
            item_revision_threshold: threshold,
        }
    }

    /// Records `payload`. Returns the new entry unless it was a repeat.
    pub fn add_entry_for_payload(&mut self, payload: Payload, text_field: &str) -> Option<&ItemHistoryEntry> {
        self.histories
            .entry(payload.uuid.clone())
            .or_default()
            .add_history_entry_for_item(payload, text_field)
    }

    /// History of one item, if any was recorded.
    pub fn history_for_item(&self, uuid: &str) -> Option<&ItemHistory> {
        self.histories.get(uuid)
    }

    /// Uuids with recorded history.
    pub fn item_uuids(&self) -> impl Iterator<Item = &str> {
        self.histories.keys().map(String::as_str)
    }

    /// Forgets one item's history.
    pub fn clear_item_history(&mut self, uuid: &str) {
        if let Some(history) = self.histories.get_mut(uuid) {
            history.clear();
        }
    }

    /// Forgets everything.
    pub fn clear_all_history(&mut self) {
        self.histories.clear();
    }

    /// Current optimization threshold.
    pub fn item_revision_threshold(&self) -> usize {
        self.item_revision_threshold
    }

    /// Sets the optimization threshold.
    pub fn set_item_revision_threshold(&mut self, threshold: usize) {
        self.item_revision_threshold = threshold;
    }

    /// Optimizes one item when it has more entries than the threshold.
    ///
    /// Optimization decides what is worth keeping, so an item may stay above
    /// the threshold afterwards. Returns how many entries were removed.
    pub fn optimize_history_for_item(&mut self, uuid: &str) -> usize {
        match self.histories.get_mut(uuid) {
            Some(history) if history.len() > self.item_revision_threshold => history.optimize(),
            _ => 0,
        }
    }
}
