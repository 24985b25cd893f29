//! Uuid-indexed payload sets.

use crate::payload::Payload;
use crate::source::PayloadSource;
use std::collections::BTreeMap;

/// An immutable snapshot of payloads keyed by uuid.
///
/// Used as the "base" side when computing import and conflict deltas, so
/// that decisions are made against state captured before any change in the
/// same batch was applied.
#[derive(Debug, Clone, Default)]
pub struct PayloadCollection {
    payloads: BTreeMap<String, Payload>,
    source: PayloadSource,
}

impl PayloadCollection {
    /// Creates a collection from payloads.
    pub fn new(payloads: impl IntoIterator<Item = Payload>, source: PayloadSource) -> Self {
        Self {
            payloads: payloads
                .into_iter()
                .map(|p| (p.uuid.clone(), p))
                .collect(),
            source,
        }
    }

    /// Source of the collection.
    pub fn source(&self) -> PayloadSource {
        self.source
    }

    /// Finds a payload.
    pub fn find(&self, uuid: &str) -> Option<&Payload> {
        self.payloads.get(uuid)
    }

    /// All payloads in uuid order.
    pub fn all(&self) -> impl Iterator<Item = &Payload> {
        self.payloads.values()
    }

    /// Payloads that duplicate `uuid`.
    pub fn duplicates_of<'a>(&'a self, uuid: &'a str) -> impl Iterator<Item = &'a Payload> + 'a {
        self.payloads
            .values()
            .filter(move |p| p.duplicate_of.as_deref() == Some(uuid))
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ItemContent;
    use crate::content_type::ContentType;

    #[test]
    fn lookup_and_duplicates() {
        let original = Payload::new(ContentType::Note, ItemContent::new());
        let mut duplicate = Payload::new(ContentType::Note, ItemContent::new());
        duplicate.duplicate_of = Some(original.uuid.clone());

        let collection = PayloadCollection::new(
            vec![original.clone(), duplicate.clone()],
            PayloadSource::FileImport,
        );
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.source(), PayloadSource::FileImport);
        assert!(collection.find(&original.uuid).is_some());
        let dups: Vec<_> = collection.duplicates_of(&original.uuid).collect();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].uuid, duplicate.uuid);
    }
}
