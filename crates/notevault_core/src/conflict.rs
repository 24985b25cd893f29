//! Conflict resolution between two versions of one uuid.
//!
//! A [`ConflictDelta`] reconciles an incoming payload ("right") into the
//! version already held ("left"). The strategy comes from the capability
//! registry; this module turns it into concrete replacement payloads.
//!
//! Each side is tagged with an [`Origin`]: `Local` content still has to
//! reach the server, `Remote` content is what the server already holds.
//! Whatever survives with local origin is marked dirty and adopts the
//! server's `updated_at`, so the next upload overwrites instead of
//! conflicting again.

use chrono::{DateTime, Utc};
use notevault_model::{
    generate_uuid, AppDataKey, ConflictStrategy, Content, Payload, PayloadCollection,
    PolicyRegistry,
};
use serde_json::Value;

/// Where one side of a conflict comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Local state the server has not seen.
    Local,
    /// State the server already holds.
    Remote,
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone)]
pub struct ConflictResult {
    /// The strategy that was applied.
    pub strategy: ConflictStrategy,
    /// The payload kept under the original uuid.
    pub primary: Payload,
    /// Right's content under a new uuid, for duplicating strategies.
    pub duplicate: Option<Payload>,
}

impl ConflictResult {
    /// All resulting payloads, primary first.
    pub fn payloads(&self) -> Vec<Payload> {
        let mut payloads = vec![self.primary.clone()];
        payloads.extend(self.duplicate.clone());
        payloads
    }
}

/// Reconciles one incoming payload into one held payload.
#[derive(Debug)]
pub struct ConflictDelta<'a> {
    base: &'a Payload,
    base_origin: Origin,
    apply: &'a Payload,
    apply_origin: Origin,
    policies: &'a PolicyRegistry,
}

impl<'a> ConflictDelta<'a> {
    /// Creates a delta with a local base and a remote incoming payload.
    pub fn new(base: &'a Payload, apply: &'a Payload, policies: &'a PolicyRegistry) -> Self {
        Self {
            base,
            base_origin: Origin::Local,
            apply,
            apply_origin: Origin::Remote,
            policies,
        }
    }

    /// Overrides the origins of both sides.
    #[must_use]
    pub fn with_origins(mut self, base: Origin, apply: Origin) -> Self {
        self.base_origin = base;
        self.apply_origin = apply;
        self
    }

    /// The strategy the registry picks for this pair.
    pub fn strategy(&self) -> ConflictStrategy {
        self.policies.strategy_when_conflicting(self.base, self.apply)
    }

    /// Resolves the conflict.
    pub fn resolve(&self, now: DateTime<Utc>) -> ConflictResult {
        let strategy = self.strategy();
        let (primary, duplicate) = match strategy {
            ConflictStrategy::KeepLeft => (self.keep(self.base, self.base_origin, now), None),
            ConflictStrategy::KeepRight => (self.keep(self.apply, self.apply_origin, now), None),
            ConflictStrategy::KeepLeftDuplicateRight => (
                self.keep(self.base, self.base_origin, now),
                Some(duplicate_payload(self.apply, &self.base.uuid, now)),
            ),
            ConflictStrategy::KeepLeftMergeRefs => (self.merge_references(now), None),
        };
        ConflictResult {
            strategy,
            primary,
            duplicate,
        }
    }

    fn server_updated_at(&self) -> DateTime<Utc> {
        match (self.base_origin, self.apply_origin) {
            (Origin::Remote, _) => self.base.updated_at,
            (_, Origin::Remote) => self.apply.updated_at,
            _ => self.base.updated_at,
        }
    }

    fn keep(&self, payload: &Payload, origin: Origin, now: DateTime<Utc>) -> Payload {
        let mut kept = payload.clone();
        kept.uuid = self.base.uuid.clone();
        match origin {
            Origin::Remote => kept.with_clean(),
            Origin::Local => {
                kept.updated_at = self.server_updated_at();
                kept.with_dirty(now)
            }
        }
    }

    fn merge_references(&self, now: DateTime<Utc>) -> Payload {
        let mut merged = self.base.clone();
        if let (Some(Content::Decrypted(content)), Some(other)) =
            (&mut merged.content, self.apply.decrypted_content())
        {
            content.merge_references(other);
        }
        merged.updated_at = self.server_updated_at();
        merged.with_dirty(now)
    }
}

/// Copies `payload` under a fresh uuid, marked as a duplicate of `original`.
pub(crate) fn duplicate_payload(payload: &Payload, original: &str, now: DateTime<Utc>) -> Payload {
    let mut duplicate = payload.clone().with_clean();
    duplicate.uuid = generate_uuid();
    duplicate.duplicate_of = Some(original.to_string());
    duplicate.enc_item_key = None;
    duplicate.items_key_id = None;
    duplicate.auth_hash = None;
    duplicate.error_decrypting = false;
    duplicate.waiting_for_key = false;
    duplicate.last_sync_began = None;
    duplicate.last_sync_end = None;
    if let Some(Content::Decrypted(content)) = &mut duplicate.content {
        content.set_app_data_value(AppDataKey::ConflictOf, Value::String(original.to_string()));
    }
    duplicate.with_dirty(now)
}

/// Reconciles imported payloads against a snapshot of the index.
///
/// Import is idempotent: content already present, either on the item
/// itself or on one of its duplicates, produces nothing.
#[derive(Debug)]
pub struct ImportDelta<'a> {
    base: &'a PayloadCollection,
    policies: &'a PolicyRegistry,
}

impl<'a> ImportDelta<'a> {
    /// Creates a delta against `base`, which must be taken before the import is applied.
    pub fn new(base: &'a PayloadCollection, policies: &'a PolicyRegistry) -> Self {
        Self { base, policies }
    }

    /// Payloads that apply `incoming`. Empty when there is nothing to do.
    pub fn resolve(&self, incoming: &Payload, now: DateTime<Utc>) -> Vec<Payload> {
        let Some(local) = self.base.find(&incoming.uuid) else {
            return vec![incoming.clone().with_clean().with_dirty(now)];
        };

        if local.deleted {
            let mut revived = incoming.clone().with_clean();
            revived.updated_at = local.updated_at;
            revived.deleted = false;
            return vec![revived.with_dirty(now)];
        }

        if self.policies.contents_equal(local, incoming, false) {
            return Vec::new();
        }

        let already_duplicated = self
            .base
            .duplicates_of(&incoming.uuid)
            .any(|duplicate| self.policies.contents_equal(duplicate, incoming, false));
        if already_duplicated {
            return Vec::new();
        }

        let base_origin = if local.dirty { Origin::Local } else { Origin::Remote };
        ConflictDelta::new(local, incoming, self.policies)
            .with_origins(base_origin, Origin::Local)
            .resolve(now)
            .payloads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use notevault_model::{ContentReference, ContentType, ItemContent, PayloadSource};

    fn note(uuid: &str, title: &str) -> Payload {
        Payload::with_uuid(uuid, ContentType::Note, ItemContent::with_title_and_text(title, "body"))
    }

    #[test]
    fn differing_content_duplicates_right() {
        let policies = PolicyRegistry::standard();
        let local = note("n1", "local").with_dirty(Utc::now());
        let mut remote = note("n1", "remote");
        remote.updated_at = local.updated_at + Duration::seconds(10);

        let result = ConflictDelta::new(&local, &remote, &policies).resolve(Utc::now());
        assert_eq!(result.strategy, ConflictStrategy::KeepLeftDuplicateRight);

        assert_eq!(result.primary.uuid, "n1");
        assert_eq!(result.primary.decrypted_content().unwrap().title(), Some("local"));
        assert!(result.primary.dirty);
        assert_eq!(result.primary.updated_at, remote.updated_at);

        let duplicate = result.duplicate.unwrap();
        assert_ne!(duplicate.uuid, "n1");
        assert_eq!(duplicate.duplicate_of.as_deref(), Some("n1"));
        assert_eq!(duplicate.decrypted_content().unwrap().title(), Some("remote"));
        assert!(duplicate.dirty);
    }

    #[test]
    fn server_on_left_keeps_server_clean() {
        let policies = PolicyRegistry::standard();
        let server = note("n1", "server");
        let local = note("n1", "local").with_dirty(Utc::now());

        let result = ConflictDelta::new(&server, &local, &policies)
            .with_origins(Origin::Remote, Origin::Local)
            .resolve(Utc::now());

        assert_eq!(result.primary.decrypted_content().unwrap().title(), Some("server"));
        assert!(!result.primary.dirty);
        let duplicate = result.duplicate.unwrap();
        assert_eq!(duplicate.decrypted_content().unwrap().title(), Some("local"));
        assert!(duplicate.dirty);
    }

    #[test]
    fn equal_content_keeps_right() {
        let policies = PolicyRegistry::standard();
        let local = note("n1", "same").with_dirty(Utc::now());
        let remote = note("n1", "same").with_source(PayloadSource::RemoteRetrieved);

        let result = ConflictDelta::new(&local, &remote, &policies).resolve(Utc::now());
        assert_eq!(result.strategy, ConflictStrategy::KeepRight);
        assert!(!result.primary.dirty);
        assert!(result.duplicate.is_none());
    }

    #[test]
    fn reference_only_divergence_merges() {
        let policies = PolicyRegistry::standard();
        let mut left_content = ItemContent::new();
        left_content.set("title", Value::String("work".into()));
        left_content.add_reference(ContentReference::new("a", ContentType::Note));
        let mut right_content = left_content.clone();
        right_content.references.clear();
        right_content.add_reference(ContentReference::new("b", ContentType::Note));

        let local = Payload::with_uuid("t1", ContentType::Tag, left_content);
        let remote = Payload::with_uuid("t1", ContentType::Tag, right_content);

        let result = ConflictDelta::new(&local, &remote, &policies).resolve(Utc::now());
        assert_eq!(result.strategy, ConflictStrategy::KeepLeftMergeRefs);
        let merged = result.primary.decrypted_content().unwrap();
        assert!(merged.has_reference("a"));
        assert!(merged.has_reference("b"));
        assert!(result.primary.dirty);
    }

    #[test]
    fn never_duplicated_types_keep_left() {
        let policies = PolicyRegistry::standard();
        let mut a = ItemContent::new();
        a.set("itemsKey", Value::String("aa".into()));
        let mut b = ItemContent::new();
        b.set("itemsKey", Value::String("bb".into()));
        let local = Payload::with_uuid("k1", ContentType::ItemsKey, a);
        let remote = Payload::with_uuid("k1", ContentType::ItemsKey, b);

        let result = ConflictDelta::new(&local, &remote, &policies).resolve(Utc::now());
        assert_eq!(result.strategy, ConflictStrategy::KeepLeft);
        assert!(result.duplicate.is_none());
        assert_eq!(result.primary.decrypted_content().unwrap().get_str("itemsKey"), Some("aa"));
    }

    #[test]
    fn import_is_idempotent() {
        let policies = PolicyRegistry::standard();
        let now = Utc::now();
        let local = note("n1", "original");
        let imported = note("n1", "from backup");

        let base = PayloadCollection::new(vec![local.clone()], PayloadSource::LocalRetrieved);
        let first = ImportDelta::new(&base, &policies).resolve(&imported, now);
        assert_eq!(first.len(), 2);
        let duplicate = first[1].clone();
        assert_eq!(duplicate.duplicate_of.as_deref(), Some("n1"));

        let base = PayloadCollection::new(vec![local, duplicate], PayloadSource::LocalRetrieved);
        let second = ImportDelta::new(&base, &policies).resolve(&imported, now);
        assert!(second.is_empty());
    }

    #[test]
    fn import_revives_deleted_and_inserts_new() {
        let policies = PolicyRegistry::standard();
        let now = Utc::now();
        let mut deleted = note("n1", "");
        deleted.deleted = true;
        deleted.content = Some(Content::Decrypted(ItemContent::new()));

        let base = PayloadCollection::new(vec![deleted], PayloadSource::LocalRetrieved);
        let delta = ImportDelta::new(&base, &policies);

        let revived = delta.resolve(&note("n1", "back"), now);
        assert_eq!(revived.len(), 1);
        assert!(!revived[0].deleted);
        assert!(revived[0].dirty);

        let fresh = delta.resolve(&note("n2", "new"), now);
        assert_eq!(fresh.len(), 1);
        assert!(fresh[0].dirty);

        let same = ImportDelta::new(
            &PayloadCollection::new(vec![note("n3", "x")], PayloadSource::LocalRetrieved),
            &policies,
        )
        .resolve(&note("n3", "x"), now);
        assert!(same.is_empty());
    }
}
