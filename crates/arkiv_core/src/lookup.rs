//! Key-based and predicate-based entity lookup.

use crate::entity::{EntityId, Session};
use crate::error::{ModelError, ModelResult};
use crate::types::EntityType;
use arkiv_store::Oid;

/// Lookup helper over the persistent entities of a [`Session`].
///
/// All lookups resolve through the store's type-scoped enumeration and the
/// session arena, and require an active transaction. Simple-key matching is
/// case-insensitive, mirroring key equality.
///
/// Obtained from [`Session::finder`]:
///
/// ```rust,ignore
/// session.begin_read()?;
/// let venue = session.finder().read(LOCATION, "Fred's", None)?;
/// session.commit()?;
/// ```
#[derive(Debug)]
pub struct Finder<'s> {
    session: &'s Session,
}

impl<'s> Finder<'s> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Looks up the entity of a type by simple key and identifying parent.
    ///
    /// Pass `None` for top-level types; for scoped types `None` matches only
    /// entities with no identifying parent, which a persisted scoped entity
    /// never is.
    ///
    /// # Errors
    ///
    /// Fails with [`ModelError::NotFound`] when no entity matches, and
    /// [`ModelError::InvalidState`] outside a transaction.
    pub fn read(
        &self,
        entity_type: EntityType,
        simple_key: &str,
        identifying_parent: Option<EntityId>,
    ) -> ModelResult<EntityId> {
        self.session
            .find_by_key(entity_type, simple_key, identifying_parent)?
            .ok_or_else(|| ModelError::not_found(entity_type.name(), simple_key))
    }

    /// Returns the first persistent entity of the type satisfying the
    /// predicate, in store enumeration order.
    pub fn find(
        &self,
        entity_type: EntityType,
        mut predicate: impl FnMut(EntityId) -> bool,
    ) -> ModelResult<Option<EntityId>> {
        for candidate in self.session.persistent_ids_of(entity_type)? {
            if predicate(candidate) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Returns a persistent entity of the type whose simple key equals the
    /// given one case-insensitively, skipping the entity stored under
    /// `excluding`.
    ///
    /// This is the population-wide duplicate probe used before renaming or
    /// persisting a top-level entity: `excluding` carries the entity's own
    /// oid on rename so it does not collide with itself.
    pub fn find_duplicate_simple_key(
        &self,
        entity_type: EntityType,
        excluding: Option<Oid>,
        simple_key: &str,
    ) -> ModelResult<Option<EntityId>> {
        self.session
            .find_duplicate_simple_key(entity_type, excluding, simple_key)
    }

    /// Returns all persistent entities of the type.
    pub fn all(&self, entity_type: EntityType) -> ModelResult<Vec<EntityId>> {
        self.session.persistent_ids_of(entity_type)
    }
}
