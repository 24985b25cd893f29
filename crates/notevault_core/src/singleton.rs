//! Singleton enforcement.
//!
//! Content types with a singleton policy may have at most one live item
//! matching the policy predicate. Whenever items of such a type are
//! mapped, the earliest-created instance is kept (ties broken by uuid)
//! and the rest are marked deleted so the deletion syncs.

use crate::error::CoreResult;
use crate::item_manager::ItemManager;
use crate::observer::{ContentTypeFilter, ObserverId};
use notevault_model::{ContentType, Item, ItemContent, MutationType, Predicate, SingletonStrategy};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Keeps singleton content types unique.
#[derive(Debug)]
pub struct SingletonManager {
    items: Arc<ItemManager>,
    observer: ObserverId,
}

impl SingletonManager {
    /// Attaches to `items` and resolves singletons after every mapping.
    pub fn new(items: Arc<ItemManager>) -> Self {
        let types = items.policies().singleton_types();
        let weak = Arc::downgrade(&items);
        let observer = items.add_observer(ContentTypeFilter::Only(types), move |change| {
            let Some(items) = weak.upgrade() else {
                return;
            };
            let touched: BTreeSet<ContentType> = change
                .changed_or_inserted()
                .filter(|item| !item.deleted())
                .map(|item| item.content_type().clone())
                .collect();
            for content_type in touched {
                if let Err(err) = resolve_type(&items, &content_type) {
                    warn!(content_type = %content_type.as_str(), error = %err, "singleton resolution failed");
                }
            }
        });
        Self { items, observer }
    }

    /// Resolves every singleton type. Returns how many items were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if marking an item deleted fails.
    pub fn resolve_singletons(&self) -> CoreResult<usize> {
        let mut removed = 0;
        for content_type in self.items.policies().singleton_types() {
            removed += resolve_type(&self.items, &content_type)?;
        }
        Ok(removed)
    }

    /// Returns the surviving instance matching `predicate`, creating it
    /// from `content` when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if creating the item fails.
    pub fn find_or_create_singleton(
        &self,
        predicate: &Predicate,
        content_type: ContentType,
        content: ItemContent,
    ) -> CoreResult<Item> {
        let mut matches = self.items.items_matching(&content_type, predicate);
        if !matches.is_empty() {
            sort_by_survival(&mut matches, SingletonStrategy::KeepEarliest);
            return Ok(matches.swap_remove(0));
        }
        self.items.create_item(content_type, content, true)
    }
}

impl Drop for SingletonManager {
    fn drop(&mut self) {
        self.items.remove_observer(self.observer);
    }
}

fn sort_by_survival(items: &mut [Item], strategy: SingletonStrategy) {
    match strategy {
        SingletonStrategy::KeepEarliest => items.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.uuid().cmp(b.uuid()))
        }),
    }
}

fn resolve_type(items: &ItemManager, content_type: &ContentType) -> CoreResult<usize> {
    let Some(policy) = items.policies().policy_for(content_type).singleton.clone() else {
        return Ok(0);
    };
    let mut matches: Vec<Item> = items
        .items_matching(content_type, &policy.predicate)
        .into_iter()
        .filter(|item| !item.error_decrypting())
        .collect();
    if matches.len() <= 1 {
        return Ok(0);
    }

    sort_by_survival(&mut matches, policy.strategy);
    let losers: Vec<String> = matches[1..].iter().map(|item| item.uuid().to_string()).collect();
    debug!(
        content_type = %content_type.as_str(),
        survivor = %matches[0].uuid(),
        removed = losers.len(),
        "resolving singleton duplicates"
    );
    items.change_items(&losers, |m| m.set_deleted(), MutationType::Internal)?;
    Ok(losers.len())
}
