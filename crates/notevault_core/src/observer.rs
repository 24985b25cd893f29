//! Item change notifications.

use notevault_model::{ContentType, Item, PayloadSource};
use std::sync::Arc;

/// Identifies a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

/// Which content types an observer wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentTypeFilter {
    /// Every content type.
    All,
    /// Only the listed types.
    Only(Vec<ContentType>),
}

impl ContentTypeFilter {
    /// Filter for a single type.
    pub fn only(content_type: ContentType) -> Self {
        Self::Only(vec![content_type])
    }

    /// True if `content_type` passes the filter.
    pub fn matches(&self, content_type: &ContentType) -> bool {
        match self {
            ContentTypeFilter::All => true,
            ContentTypeFilter::Only(types) => types.contains(content_type),
        }
    }
}

/// One notification: disjoint buckets plus the triggering source.
#[derive(Debug, Clone)]
pub struct ItemsChange {
    /// Items that existed before and were replaced.
    pub changed: Vec<Item>,
    /// Items new to the index.
    pub inserted: Vec<Item>,
    /// Items removed from the index.
    pub discarded: Vec<Item>,
    /// Provenance of the change.
    pub source: PayloadSource,
}

impl ItemsChange {
    pub(crate) fn new(source: PayloadSource) -> Self {
        Self {
            changed: Vec::new(),
            inserted: Vec::new(),
            discarded: Vec::new(),
            source,
        }
    }

    /// True if every bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.inserted.is_empty() && self.discarded.is_empty()
    }

    /// Changed and inserted items.
    pub fn changed_or_inserted(&self) -> impl Iterator<Item = &Item> {
        self.changed.iter().chain(self.inserted.iter())
    }

    /// Total item count across buckets.
    pub fn len(&self) -> usize {
        self.changed.len() + self.inserted.len() + self.discarded.len()
    }

    pub(crate) fn filtered(&self, filter: &ContentTypeFilter) -> ItemsChange {
        let keep = |items: &[Item]| -> Vec<Item> {
            items
                .iter()
                .filter(|item| filter.matches(item.content_type()))
                .cloned()
                .collect()
        };
        ItemsChange {
            changed: keep(&self.changed),
            inserted: keep(&self.inserted),
            discarded: keep(&self.discarded),
            source: self.source,
        }
    }
}

/// Observer callback.
pub(crate) type ObserverCallback = Arc<dyn Fn(&ItemsChange) + Send + Sync>;

pub(crate) struct ObserverEntry {
    pub(crate) id: ObserverId,
    pub(crate) filter: ContentTypeFilter,
    pub(crate) callback: ObserverCallback,
}
