//! Per-entity state held in the session arena.

use crate::collection::SortedChildren;
use crate::entity::id::EntityId;
use crate::types::EntityType;
use arkiv_store::Oid;
use std::collections::{BTreeMap, VecDeque};

/// Persistence lifecycle of one entity instance.
///
/// Transitions are one-way: Transient -> Persistent -> Deleted. A deleted
/// entity permits no further mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    /// Created in memory, no oid yet.
    Transient,
    /// Durable in the store under its oid.
    Persistent,
    /// Unpersisted; the record remains only to reject stale handles.
    Deleted,
}

/// An operation queued on a transient entity, replayed in enqueue order by
/// the `persist` call that makes the entity durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeferredOp {
    /// Re-store a persistent relative whose snapshot could not reference this
    /// entity while it had no oid.
    RestoreRelative(EntityId),
}

/// Mutable state of one entity instance.
///
/// Parent references and child collections hold [`EntityId`] handles; the
/// session resolves them through the arena, so the bidirectional graph forms
/// no ownership cycles.
#[derive(Debug)]
pub(crate) struct EntityRecord {
    pub entity_type: EntityType,
    pub simple_key: String,
    pub identifying_parent: Option<EntityId>,
    /// Non-identifying parent references, at most one per parent type.
    pub parents: BTreeMap<EntityType, EntityId>,
    /// Child collections, created lazily on first attach per child type.
    pub children: BTreeMap<EntityType, SortedChildren>,
    pub oid: Option<Oid>,
    pub lifecycle: Lifecycle,
    pub deferred: VecDeque<DeferredOp>,
}

impl EntityRecord {
    pub(crate) fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            simple_key: String::new(),
            identifying_parent: None,
            parents: BTreeMap::new(),
            children: BTreeMap::new(),
            oid: None,
            lifecycle: Lifecycle::Transient,
            deferred: VecDeque::new(),
        }
    }

    pub(crate) fn is_persistent(&self) -> bool {
        self.lifecycle == Lifecycle::Persistent
    }

    /// Returns the child collection for a type, creating it on first access.
    pub(crate) fn children_mut(&mut self, child_type: EntityType) -> &mut SortedChildren {
        self.children
            .entry(child_type)
            .or_insert_with(|| SortedChildren::new(child_type))
    }

    /// Child collections that still hold entries, with their counts, in
    /// child-type order. Used for the referential-integrity diagnostic.
    pub(crate) fn blocking_children(&self) -> Vec<(EntityType, usize)> {
        self.children
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(t, c)| (*t, c.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCATION: EntityType = EntityType::new("Location");
    const EVENT: EntityType = EntityType::new("Event");

    #[test]
    fn new_record_is_transient_and_empty() {
        let record = EntityRecord::new(LOCATION);
        assert_eq!(record.lifecycle, Lifecycle::Transient);
        assert!(!record.is_persistent());
        assert!(record.oid.is_none());
        assert!(record.blocking_children().is_empty());
    }

    #[test]
    fn child_collection_is_created_lazily() {
        let mut record = EntityRecord::new(LOCATION);
        assert!(record.children.is_empty());
        record.children_mut(EVENT);
        assert_eq!(record.children.len(), 1);
    }

    #[test]
    fn blocking_children_skips_empty_collections() {
        let mut record = EntityRecord::new(LOCATION);
        record.children_mut(EVENT);
        assert!(record.blocking_children().is_empty());

        record
            .children_mut(EVENT)
            .add(crate::key::EntityKey::top_level("2013/04/11"), EntityId::new())
            .unwrap();
        assert_eq!(record.blocking_children(), vec![(EVENT, 1)]);
    }
}
