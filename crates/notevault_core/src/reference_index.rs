//! Derived reverse-reference index.
//!
//! Maps a uuid to the uuids of items whose content references it. The
//! index is updated incrementally as payloads are committed, so items
//! never hold pointers to each other.

use notevault_model::Item;
use std::collections::{BTreeSet, HashMap};

/// Reverse index of references.
#[derive(Debug, Default, Clone)]
pub struct ReferenceIndex {
    outgoing: HashMap<String, BTreeSet<String>>,
    incoming: HashMap<String, BTreeSet<String>>,
}

impl ReferenceIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `item`'s current references, replacing what was recorded before.
    pub fn update(&mut self, item: &Item) {
        let targets: BTreeSet<String> = item.references().iter().map(|r| r.uuid.clone()).collect();
        self.set_references(item.uuid(), targets);
    }

    /// Forgets everything `uuid` referenced.
    ///
    /// References *to* `uuid` are kept: they belong to other items.
    pub fn remove(&mut self, uuid: &str) {
        self.set_references(uuid, BTreeSet::new());
    }

    /// Uuids of items referencing `uuid`.
    pub fn referencing(&self, uuid: &str) -> Vec<String> {
        self.incoming
            .get(uuid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Uuids `uuid` references.
    pub fn references_of(&self, uuid: &str) -> Vec<String> {
        self.outgoing
            .get(uuid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
    }

    fn set_references(&mut self, uuid: &str, targets: BTreeSet<String>) {
        let previous = self.outgoing.remove(uuid).unwrap_or_default();
        for old in previous.difference(&targets) {
            if let Some(sources) = self.incoming.get_mut(old) {
                sources.remove(uuid);
                if sources.is_empty() {
                    self.incoming.remove(old);
                }
            }
        }
        for target in &targets {
            self.incoming
                .entry(target.clone())
                .or_default()
                .insert(uuid.to_string());
        }
        if !targets.is_empty() {
            self.outgoing.insert(uuid.to_string(), targets);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notevault_model::{ContentReference, ContentType, ItemContent, Payload};

    fn tag(uuid: &str, notes: &[&str]) -> Item {
        let mut content = ItemContent::new();
        for note in notes {
            content.add_reference(ContentReference::new(*note, ContentType::Note));
        }
        Item::new(Payload::with_uuid(uuid, ContentType::Tag, content))
    }

    #[test]
    fn tracks_incoming_references() {
        let mut index = ReferenceIndex::new();
        index.update(&tag("t1", &["n1", "n2"]));
        index.update(&tag("t2", &["n1"]));

        assert_eq!(index.referencing("n1"), vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(index.referencing("n2"), vec!["t1".to_string()]);
        assert!(index.referencing("n3").is_empty());
    }

    #[test]
    fn update_replaces_previous_references() {
        let mut index = ReferenceIndex::new();
        index.update(&tag("t1", &["n1", "n2"]));
        index.update(&tag("t1", &["n2"]));

        assert!(index.referencing("n1").is_empty());
        assert_eq!(index.references_of("t1"), vec!["n2".to_string()]);
    }

    #[test]
    fn remove_forgets_outgoing_only() {
        let mut index = ReferenceIndex::new();
        index.update(&tag("t1", &["n1"]));
        index.update(&tag("t2", &["t1"]));
        index.remove("t1");

        assert!(index.referencing("n1").is_empty());
        assert_eq!(index.referencing("t1"), vec!["t2".to_string()]);
    }
}
