//! Sorted child collection implementation.

use crate::entity::EntityId;
use crate::error::{ModelError, ModelResult};
use crate::key::EntityKey;
use crate::types::EntityType;
use std::collections::BTreeMap;

/// An ordered map from [`EntityKey`] to child entity, belonging to one parent
/// instance and holding children of one entity type.
///
/// The collection is purely structural: it never touches the child's
/// identifying-parent or parent-reference fields. The session calls
/// collection operations and field updates together so both sides of a
/// relation stay consistent within one logical mutation.
///
/// Positions handed out by [`at`](Self::at) are a view over the ascending key
/// order (grid row mapping), not stable storage slots.
#[derive(Debug, Clone)]
pub struct SortedChildren {
    child_type: EntityType,
    entries: BTreeMap<EntityKey, EntityId>,
}

impl SortedChildren {
    /// Creates an empty collection for children of the given type.
    #[must_use]
    pub fn new(child_type: EntityType) -> Self {
        Self {
            child_type,
            entries: BTreeMap::new(),
        }
    }

    /// Returns the entity type of the children held here.
    #[must_use]
    pub fn child_type(&self) -> EntityType {
        self.child_type
    }

    /// Returns the number of children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds a child under its key.
    ///
    /// Re-adding the same child identity under an equal key is a no-op.
    ///
    /// # Errors
    ///
    /// Fails with [`ModelError::DuplicateKey`] if a *different* child already
    /// holds an equal key.
    pub fn add(&mut self, key: EntityKey, child: EntityId) -> ModelResult<()> {
        match self.entries.get(&key) {
            Some(existing) if *existing == child => Ok(()),
            Some(_) => Err(ModelError::duplicate_key(self.child_type.name(), &key)),
            None => {
                self.entries.insert(key, child);
                Ok(())
            }
        }
    }

    /// Removes the child under the given key, returning its identity.
    ///
    /// # Errors
    ///
    /// Fails with [`ModelError::KeyNotFound`] if no child holds the key.
    pub fn remove(&mut self, key: &EntityKey) -> ModelResult<EntityId> {
        self.entries
            .remove(key)
            .ok_or_else(|| ModelError::key_not_found(key))
    }

    /// Moves a child from one key to another.
    ///
    /// Used by the session when an ancestor key component changes and every
    /// affected entry must be re-filed without touching the child itself.
    /// Moving a child onto its own key (a case-only change) is permitted.
    ///
    /// # Errors
    ///
    /// Fails with [`ModelError::KeyNotFound`] if no child holds the old key,
    /// and with [`ModelError::DuplicateKey`] if a *different* child already
    /// holds the new key; the collection is unchanged on failure.
    pub(crate) fn rekey(&mut self, old: &EntityKey, new: EntityKey) -> ModelResult<()> {
        let child = self
            .get(old)
            .ok_or_else(|| ModelError::key_not_found(old))?;
        if let Some(existing) = self.get(&new) {
            if existing != child {
                return Err(ModelError::duplicate_key(self.child_type.name(), &new));
            }
        }
        self.entries.remove(old);
        self.entries.insert(new, child);
        Ok(())
    }

    /// Returns whether a child holds the given key.
    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the child holding the given key, if any.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<EntityId> {
        self.entries.get(key).copied()
    }

    /// Returns the child at the given position in ascending key order.
    #[must_use]
    pub fn at(&self, position: usize) -> Option<(&EntityKey, EntityId)> {
        self.entries.iter().nth(position).map(|(k, id)| (k, *id))
    }

    /// Iterates children in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, EntityId)> {
        self.entries.iter().map(|(k, id)| (k, *id))
    }

    /// Iterates child identities in ascending key order.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entries.values().copied()
    }
}
