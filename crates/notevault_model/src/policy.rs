//! Per-content-type capability registry.
//!
//! Item behavior that varies by type (which keys to ignore when comparing,
//! whether the type is a singleton, whether it may ever be duplicated) is
//! looked up here instead of being spread over item subtypes.

use crate::content::AppDataKey;
use crate::content_type::ContentType;
use crate::payload::Payload;
use crate::predicate::{ComparisonOperator, Predicate};
use serde_json::json;
use std::collections::HashMap;

/// How to reconcile two versions of the same uuid.
///
/// "Left" is the version already held, "right" the incoming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Keep left, drop right.
    KeepLeft,
    /// Right overwrites left.
    KeepRight,
    /// Keep left, persist right under a new uuid.
    KeepLeftDuplicateRight,
    /// Keep left's scalar content, union both reference lists.
    KeepLeftMergeRefs,
}

/// Which singleton instance survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SingletonStrategy {
    /// The earliest-created instance wins, ties broken by uuid.
    #[default]
    KeepEarliest,
}

/// Declares a content type as singleton.
#[derive(Debug, Clone, PartialEq)]
pub struct SingletonPolicy {
    /// Items matching this predicate are instances of the singleton.
    pub predicate: Predicate,
    /// Survivor selection.
    pub strategy: SingletonStrategy,
}

/// Custom conflict hook. Returning `None` falls back to the default rules.
pub type ConflictHook = fn(&Payload, &Payload) -> Option<ConflictStrategy>;

/// Capabilities of one content type.
/// History text field for types that do not name one.
pub const DEFAULT_HISTORY_TEXT_FIELD: &str = "text";

#[derive(Debug, Clone)]
pub struct ContentTypePolicy {
    /// Content keys excluded from conflict equality.
    pub ignored_content_keys: Vec<&'static str>,
    /// App-data keys excluded from conflict equality.
    pub ignored_app_data_keys: Vec<&'static str>,
    /// Singleton declaration.
    pub singleton: Option<SingletonPolicy>,
    /// Never fork identity through duplication.
    pub never_duplicate: bool,
    /// Content field whose length history uses to size changes.
    pub history_text_field: Option<&'static str>,
    /// Type-specific conflict hook.
    pub conflict_hook: Option<ConflictHook>,
}

impl Default for ContentTypePolicy {
    fn default() -> Self {
        Self {
            ignored_content_keys: Vec::new(),
            ignored_app_data_keys: vec![
                AppDataKey::UserModifiedDate.as_str(),
                AppDataKey::ConflictOf.as_str(),
            ],
            singleton: None,
            never_duplicate: false,
            history_text_field: None,
            conflict_hook: None,
        }
    }
}

impl ContentTypePolicy {
    /// Marks the type as never duplicated.
    pub fn never_duplicated(mut self) -> Self {
        self.never_duplicate = true;
        self
    }

    /// Adds ignored content keys.
    pub fn ignoring_content_keys(mut self, keys: &[&'static str]) -> Self {
        self.ignored_content_keys.extend_from_slice(keys);
        self
    }

    /// Declares the type singleton under `predicate`.
    pub fn singleton(mut self, predicate: Predicate) -> Self {
        self.singleton = Some(SingletonPolicy {
            predicate,
            strategy: SingletonStrategy::KeepEarliest,
        });
        self
    }

    /// Sets the history text field.
    pub fn with_history_text_field(mut self, field: &'static str) -> Self {
        self.history_text_field = Some(field);
        self
    }

    /// Sets a custom conflict hook.
    pub fn with_conflict_hook(mut self, hook: ConflictHook) -> Self {
        self.conflict_hook = Some(hook);
        self
    }
}

/// Registry of capabilities keyed by content type.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<ContentType, ContentTypePolicy>,
    fallback: ContentTypePolicy,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl PolicyRegistry {
    /// Creates an empty registry where every type uses default behavior.
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
            fallback: ContentTypePolicy::default(),
        }
    }

    /// Creates the registry for the built-in content types.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(
            ContentType::Note,
            ContentTypePolicy::default().with_history_text_field("text"),
        );
        registry.register(
            ContentType::Tag,
            ContentTypePolicy::default().with_history_text_field("title"),
        );
        registry.register(ContentType::SmartTag, ContentTypePolicy::default());
        for ct in [ContentType::Component, ContentType::Theme] {
            registry.register(
                ct,
                ContentTypePolicy::default()
                    .never_duplicated()
                    .ignoring_content_keys(&["active", "componentData"]),
            );
        }
        registry.register(ContentType::ItemsKey, ContentTypePolicy::default().never_duplicated());
        for ct in [ContentType::UserPreferences, ContentType::Privileges] {
            let predicate =
                Predicate::new("content_type", ComparisonOperator::Equal, json!(ct.as_str()));
            registry.register(ct, ContentTypePolicy::default().singleton(predicate));
        }
        registry.register(
            ContentType::EncryptedStorage,
            ContentTypePolicy::default().never_duplicated(),
        );
        registry
    }

    /// Registers or replaces a policy.
    pub fn register(&mut self, content_type: ContentType, policy: ContentTypePolicy) {
        self.policies.insert(content_type, policy);
    }

    /// Returns the policy for `content_type`.
    pub fn policy_for(&self, content_type: &ContentType) -> &ContentTypePolicy {
        self.policies.get(content_type).unwrap_or(&self.fallback)
    }

    /// True if `content_type` is a singleton.
    pub fn is_singleton(&self, content_type: &ContentType) -> bool {
        self.policy_for(content_type).singleton.is_some()
    }

    /// Content types with singleton policies.
    pub fn singleton_types(&self) -> Vec<ContentType> {
        self.policies
            .iter()
            .filter(|(_, policy)| policy.singleton.is_some())
            .map(|(ct, _)| ct.clone())
            .collect()
    }

    /// Content field whose length sizes history entries of `content_type`.
    ///
    /// Types without one are measured by their `text`.
    pub fn history_text_field(&self, content_type: &ContentType) -> &'static str {
        self.policy_for(content_type)
            .history_text_field
            .unwrap_or(DEFAULT_HISTORY_TEXT_FIELD)
    }

    /// Compares two payloads' content under `left`'s policy.
    ///
    /// Payloads that are not both decrypted compare by raw content.
    pub fn contents_equal(&self, left: &Payload, right: &Payload, ignore_references: bool) -> bool {
        match (left.decrypted_content(), right.decrypted_content()) {
            (Some(a), Some(b)) => {
                let policy = self.policy_for(&left.content_type);
                a.equals_ignoring(
                    b,
                    &policy.ignored_content_keys,
                    &policy.ignored_app_data_keys,
                    ignore_references,
                )
            }
            _ => left.content == right.content,
        }
    }

    /// Chooses a strategy for reconciling `right` into `left`.
    pub fn strategy_when_conflicting(&self, left: &Payload, right: &Payload) -> ConflictStrategy {
        let policy = self.policy_for(&left.content_type);
        if let Some(strategy) = policy.conflict_hook.and_then(|hook| hook(left, right)) {
            return strategy;
        }
        if left.error_decrypting {
            return ConflictStrategy::KeepLeftDuplicateRight;
        }
        if policy.singleton.is_some() || policy.never_duplicate {
            return ConflictStrategy::KeepLeft;
        }
        if left.deleted || right.deleted {
            return ConflictStrategy::KeepRight;
        }
        if self.contents_equal(left, right, false) {
            return ConflictStrategy::KeepRight;
        }
        if self.contents_equal(left, right, true) {
            return ConflictStrategy::KeepLeftMergeRefs;
        }
        ConflictStrategy::KeepLeftDuplicateRight
    }
}
