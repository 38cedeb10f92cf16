//! Session: the entity arena and its consistency state machine.

use crate::entity::codec::{self, EntityData};
use crate::entity::id::EntityId;
use crate::entity::record::{DeferredOp, EntityRecord, Lifecycle};
use crate::error::{ModelError, ModelResult};
use crate::key::{eq_ignore_case, EntityKey};
use crate::lookup::Finder;
use crate::schema::{global_registry, SchemaRegistry};
use crate::types::EntityType;
use arkiv_store::{ObjectBackend, Oid};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnKind {
    Read,
    Update,
}

/// Owns the in-memory entity graph and keeps it consistent with the backing
/// store.
///
/// The session is the only sanctioned cross-entity mutation path: every
/// attach/detach updates both sides of the relation - the child's reference
/// field and the parent's [`SortedChildren`](crate::SortedChildren) - within
/// one logical mutation, and every duplicate check runs strictly before any
/// collection is touched, so a failed validation never leaves a half-applied
/// link.
///
/// Execution is single-threaded and transaction-scoped: one store
/// transaction per logical change, no internal locking. After an aborted
/// transaction the arena may disagree with the store; callers discard their
/// handles and call [`refresh`](Self::refresh) rather than continuing to
/// mutate.
///
/// ```rust,ignore
/// let mut session = Session::new(schema, Box::new(InMemoryBackend::new()));
/// session.update(|s| {
///     let venue = s.create(LOCATION);
///     s.set_simple_key(venue, "Fred's")?;
///     s.persist(venue)
/// })?;
/// ```
pub struct Session {
    schema: Arc<SchemaRegistry>,
    backend: Box<dyn ObjectBackend>,
    entities: HashMap<EntityId, EntityRecord>,
    by_oid: HashMap<Oid, EntityId>,
    txn: Option<TxnKind>,
}

impl Session {
    /// Creates a session over a backend with an explicit schema registry.
    pub fn new(schema: Arc<SchemaRegistry>, backend: Box<dyn ObjectBackend>) -> Self {
        Self {
            schema,
            backend,
            entities: HashMap::new(),
            by_oid: HashMap::new(),
            txn: None,
        }
    }

    /// Creates a session using the process-wide schema registry.
    ///
    /// # Panics
    ///
    /// Panics if no registry has been installed.
    pub fn with_global_registry(backend: Box<dyn ObjectBackend>) -> Self {
        Self::new(global_registry(), backend)
    }

    /// Returns the schema registry this session consults.
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    /// Returns a lookup helper borrowing this session.
    pub fn finder(&self) -> Finder<'_> {
        Finder::new(self)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Begins a read-only transaction.
    pub fn begin_read(&mut self) -> ModelResult<()> {
        self.backend.begin_read()?;
        self.txn = Some(TxnKind::Read);
        Ok(())
    }

    /// Begins an update transaction.
    pub fn begin_update(&mut self) -> ModelResult<()> {
        self.backend.begin_update()?;
        self.txn = Some(TxnKind::Update);
        Ok(())
    }

    /// Commits the active transaction.
    pub fn commit(&mut self) -> ModelResult<()> {
        self.backend.commit()?;
        self.txn = None;
        Ok(())
    }

    /// Aborts the active transaction.
    ///
    /// The arena may now disagree with the store: discard entity handles and
    /// call [`refresh`](Self::refresh) before further work.
    pub fn abort(&mut self) -> ModelResult<()> {
        self.backend.abort()?;
        self.txn = None;
        Ok(())
    }

    /// Returns whether a transaction is active.
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Executes a closure within an update transaction.
    ///
    /// Commits on `Ok`, aborts on `Err` without masking the original error.
    pub fn update<T>(&mut self, f: impl FnOnce(&mut Self) -> ModelResult<T>) -> ModelResult<T> {
        self.begin_update()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.abort();
                Err(e)
            }
        }
    }

    /// Rebuilds the arena from the store's committed state.
    ///
    /// All previously handed-out [`EntityId`] handles become dangling. This
    /// is the recovery path after an aborted transaction.
    pub fn refresh(&mut self) -> ModelResult<()> {
        if self.txn.is_some() {
            return Err(ModelError::invalid_state(
                "refresh requires no active transaction",
            ));
        }
        let schema = Arc::clone(&self.schema);

        self.backend.begin_read()?;
        let mut raw = Vec::new();
        for ty in schema.entity_types() {
            match self.backend.all_of_type(ty.name()) {
                Ok(objects) => raw.push((ty, objects)),
                Err(e) => {
                    let _ = self.backend.abort();
                    return Err(e.into());
                }
            }
        }
        self.backend.commit()?;

        let mut entities: HashMap<EntityId, EntityRecord> = HashMap::new();
        let mut by_oid: HashMap<Oid, EntityId> = HashMap::new();
        let mut decoded: Vec<(EntityId, EntityData)> = Vec::new();

        for (ty, objects) in raw {
            for (oid, payload) in objects {
                let data = codec::decode(&payload)?;
                let id = EntityId::new();
                let mut record = EntityRecord::new(ty);
                record.simple_key = data.simple_key.clone();
                record.oid = Some(oid);
                record.lifecycle = Lifecycle::Persistent;
                entities.insert(id, record);
                by_oid.insert(oid, id);
                decoded.push((id, data));
            }
        }

        // Wire parent references from stored oids.
        for (id, data) in &decoded {
            if let Some(raw_oid) = data.identifying_parent {
                let parent = resolve_oid(&by_oid, raw_oid)?;
                record_in_mut(&mut entities, *id)?.identifying_parent = Some(parent);
            }
            for (type_name, raw_oid) in &data.parents {
                let parent_type = schema
                    .entity_types()
                    .find(|t| t.name() == type_name.as_str())
                    .ok_or_else(|| {
                        ModelError::codec(format!("snapshot names undeclared type: {type_name}"))
                    })?;
                let parent = resolve_oid(&by_oid, *raw_oid)?;
                record_in_mut(&mut entities, *id)?
                    .parents
                    .insert(parent_type, parent);
            }
        }

        // Rebuild child collections from the child-side references.
        for (id, _) in &decoded {
            let key = key_in(&entities, *id)?;
            let record = record_in(&entities, *id)?;
            let child_type = record.entity_type;
            let mut holders: Vec<EntityId> = record.parents.values().copied().collect();
            if let Some(parent) = record.identifying_parent {
                holders.push(parent);
            }
            for holder in holders {
                record_in_mut(&mut entities, holder)?
                    .children_mut(child_type)
                    .add(key.clone(), *id)?;
            }
        }

        debug!(entity_count = entities.len(), "refreshed session from store");
        self.entities = entities;
        self.by_oid = by_oid;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Creation and getters
    // ------------------------------------------------------------------

    /// Creates a transient entity of the given type.
    ///
    /// # Panics
    ///
    /// Panics if the type was never declared in the schema.
    pub fn create(&mut self, entity_type: EntityType) -> EntityId {
        let _ = self.schema.type_def(entity_type);
        let id = EntityId::new();
        self.entities.insert(id, EntityRecord::new(entity_type));
        trace!(%entity_type, %id, "created transient entity");
        id
    }

    /// Returns the entity's declared type.
    pub fn entity_type(&self, id: EntityId) -> ModelResult<EntityType> {
        Ok(self.record(id)?.entity_type)
    }

    /// Returns the entity's simple key.
    pub fn simple_key(&self, id: EntityId) -> ModelResult<&str> {
        Ok(&self.record(id)?.simple_key)
    }

    /// Returns the entity's full composite key, derived recursively through
    /// its identifying-parent chain.
    pub fn key(&self, id: EntityId) -> ModelResult<EntityKey> {
        key_in(&self.entities, id)
    }

    /// Returns the store identity, if the entity has been persisted.
    pub fn oid(&self, id: EntityId) -> ModelResult<Option<Oid>> {
        Ok(self.record(id)?.oid)
    }

    /// Returns whether the entity is persistent.
    pub fn is_persistent(&self, id: EntityId) -> ModelResult<bool> {
        Ok(self.record(id)?.is_persistent())
    }

    /// Returns the identifying parent, if set.
    pub fn identifying_parent(&self, id: EntityId) -> ModelResult<Option<EntityId>> {
        Ok(self.record(id)?.identifying_parent)
    }

    /// Returns the non-identifying parent of the given type, if set.
    pub fn parent(&self, id: EntityId, parent_type: EntityType) -> ModelResult<Option<EntityId>> {
        Ok(self.record(id)?.parents.get(&parent_type).copied())
    }

    /// Returns the children of the given type in ascending key order.
    pub fn children(&self, id: EntityId, child_type: EntityType) -> ModelResult<Vec<EntityId>> {
        Ok(self
            .record(id)?
            .children
            .get(&child_type)
            .map(|c| c.ids().collect())
            .unwrap_or_default())
    }

    /// Returns the number of children of the given type.
    pub fn child_count(&self, id: EntityId, child_type: EntityType) -> ModelResult<usize> {
        Ok(self
            .record(id)?
            .children
            .get(&child_type)
            .map_or(0, |c| c.len()))
    }

    /// Returns the child at a position in ascending key order, for grid row
    /// mapping. Positions are a view, not stable slots.
    pub fn child_at(
        &self,
        id: EntityId,
        child_type: EntityType,
        position: usize,
    ) -> ModelResult<Option<(EntityKey, EntityId)>> {
        Ok(self
            .record(id)?
            .children
            .get(&child_type)
            .and_then(|c| c.at(position))
            .map(|(key, child)| (key.clone(), child)))
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Sets the entity's simple key.
    ///
    /// # Errors
    ///
    /// - [`ModelError::PropertyConstraintViolation`] if the key is blank and
    ///   the type does not allow blank keys
    /// - [`ModelError::DuplicateKey`] on a case-insensitive collision in any
    ///   collection holding the entity or one of its identifying descendants,
    ///   or - for a persistent top-level entity - among the whole population
    ///   of its type
    /// - [`ModelError::InvalidState`] if the entity is persistent and no
    ///   update transaction is active
    pub fn set_simple_key(&mut self, id: EntityId, value: &str) -> ModelResult<()> {
        let (ty, identifying, persistent, own_oid) = {
            let record = self.live(id)?;
            (
                record.entity_type,
                record.identifying_parent,
                record.is_persistent(),
                record.oid,
            )
        };
        self.guard_persistent_mutation(persistent)?;
        let schema = Arc::clone(&self.schema);
        let def = schema.type_def(ty);

        if value.trim().is_empty() && !def.allows_blank_key() {
            return Err(ModelError::property("simpleKey", "must not be blank"));
        }

        // Duplicate checks run strictly before any mutation.
        if def.is_top_level()
            && persistent
            && self
                .find_duplicate_simple_key(ty, own_oid, value)?
                .is_some()
        {
            return Err(ModelError::duplicate_key(
                ty.name(),
                EntityKey::top_level(value),
            ));
        }

        // The key of every entity in the identifying subtree embeds this
        // simple key, so their collection entries must all be re-filed;
        // every entry the re-filing will touch is collision-checked first.
        let new_root_key = match identifying {
            Some(parent) => EntityKey::new(value, Some(self.key(parent)?)),
            None => EntityKey::top_level(value),
        };
        let affected = self.identifying_subtree(id)?;
        self.check_refile_collisions(&affected, id, &new_root_key)?;
        let mut old_keys = HashMap::new();
        for &entity in &affected {
            old_keys.insert(entity, self.key(entity)?);
        }

        self.record_mut(id)?.simple_key = value.to_string();
        self.refile_entries(&affected, &old_keys, None)?;

        // Only this entity's snapshot carries the simple key itself.
        self.restore(id)?;
        Ok(())
    }

    /// Sets the identifying parent.
    ///
    /// Atomic from the caller's point of view: the duplicate check against
    /// the new parent's children runs before the entity detaches from its
    /// previous parent, so a failure leaves no partial attachment.
    ///
    /// # Errors
    ///
    /// - [`ModelError::ConstraintViolation`] if the type declares no
    ///   identifying-parent type
    /// - [`ModelError::PropertyConstraintViolation`] if the parent is not a
    ///   live entity of the declared type
    /// - [`ModelError::DuplicateKey`] if a different sibling already holds an
    ///   equal key under the new parent, or the rescoped key of the entity or
    ///   one of its identifying descendants collides in any holding collection
    /// - [`ModelError::InvalidState`] if the entity is persistent and no
    ///   update transaction is active
    pub fn set_identifying_parent(&mut self, id: EntityId, parent: EntityId) -> ModelResult<()> {
        let (ty, old_parent, simple, persistent) = {
            let record = self.live(id)?;
            (
                record.entity_type,
                record.identifying_parent,
                record.simple_key.clone(),
                record.is_persistent(),
            )
        };
        self.guard_persistent_mutation(persistent)?;
        let schema = Arc::clone(&self.schema);
        let def = schema.type_def(ty);

        let Some(expected) = def.identifying_parent_type() else {
            return Err(ModelError::constraint(format!(
                "{ty} declares no identifying parent type"
            )));
        };
        let parent_type = match self.entities.get(&parent) {
            Some(record) if record.lifecycle != Lifecycle::Deleted => record.entity_type,
            _ => {
                return Err(ModelError::property(
                    "identifyingParent",
                    "must reference a live entity",
                ));
            }
        };
        if parent_type != expected {
            return Err(ModelError::property(
                "identifyingParent",
                format!("expected {expected}, got {parent_type}"),
            ));
        }
        if old_parent == Some(parent) {
            return Ok(());
        }

        let new_key = EntityKey::new(simple, Some(self.key(parent)?));
        if let Some(siblings) = self.record(parent)?.children.get(&ty) {
            if let Some(existing) = siblings.get(&new_key) {
                if existing != id {
                    return Err(ModelError::duplicate_key(ty.name(), &new_key));
                }
            }
        }

        let affected = self.identifying_subtree(id)?;
        self.check_refile_collisions(&affected, id, &new_key)?;
        let mut old_keys = HashMap::new();
        for &entity in &affected {
            old_keys.insert(entity, self.key(entity)?);
        }

        if let Some(old) = old_parent {
            let old_key = self.key(id)?;
            self.record_mut(old)?.children_mut(ty).remove(&old_key)?;
            self.record_mut(id)?.identifying_parent = None;
            self.sync_link(id, old)?;
        }

        self.record_mut(parent)?
            .children_mut(ty)
            .add(new_key, id)?;
        self.record_mut(id)?.identifying_parent = Some(parent);

        // The root entity is already filed under its new key; re-file its
        // entries everywhere else, and all descendants everywhere.
        self.refile_entries(&affected, &old_keys, Some((id, parent)))?;
        self.sync_link(id, parent)?;
        trace!(%ty, %id, %parent, "set identifying parent");
        Ok(())
    }

    /// Sets or clears a non-identifying parent reference.
    ///
    /// # Errors
    ///
    /// - [`ModelError::ConstraintViolation`] if the relation is undeclared,
    ///   identifying, or mandatory and being cleared
    /// - [`ModelError::PropertyConstraintViolation`] if the parent is not a
    ///   live entity of the given type
    /// - [`ModelError::DuplicateKey`] if the new parent already holds a
    ///   different child under an equal key
    /// - [`ModelError::InvalidState`] if the entity is persistent and no
    ///   update transaction is active
    pub fn set_parent(
        &mut self,
        id: EntityId,
        parent_type: EntityType,
        parent: Option<EntityId>,
    ) -> ModelResult<()> {
        let (ty, persistent) = {
            let record = self.live(id)?;
            (record.entity_type, record.is_persistent())
        };
        self.guard_persistent_mutation(persistent)?;
        let schema = Arc::clone(&self.schema);
        let def = schema.type_def(ty);

        if def.identifying_parent_type() == Some(parent_type) {
            return Err(ModelError::constraint(format!(
                "{parent_type} is the identifying parent type of {ty}; use set_identifying_parent"
            )));
        }
        let Some(relation) = schema.parents_of(ty).get(&parent_type).copied() else {
            return Err(ModelError::constraint(format!(
                "no declared relation {parent_type} -> {ty}"
            )));
        };
        let old = self.record(id)?.parents.get(&parent_type).copied();

        let Some(new_parent) = parent else {
            if relation.is_mandatory() {
                return Err(ModelError::constraint(format!(
                    "relation {parent_type} -> {ty} is mandatory"
                )));
            }
            if let Some(old_parent) = old {
                let own_key = self.key(id)?;
                self.record_mut(old_parent)?
                    .children_mut(ty)
                    .remove(&own_key)?;
                self.record_mut(id)?.parents.remove(&parent_type);
                self.sync_link(id, old_parent)?;
                trace!(%ty, %id, %parent_type, "cleared parent reference");
            }
            return Ok(());
        };

        if old == Some(new_parent) {
            return Ok(());
        }
        match self.entities.get(&new_parent) {
            Some(record)
                if record.lifecycle != Lifecycle::Deleted
                    && record.entity_type == parent_type => {}
            Some(record) if record.lifecycle != Lifecycle::Deleted => {
                return Err(ModelError::property(
                    parent_type.name(),
                    format!("expected {parent_type}, got {}", record.entity_type),
                ));
            }
            _ => {
                return Err(ModelError::property(
                    parent_type.name(),
                    "must reference a live entity",
                ));
            }
        }

        let own_key = self.key(id)?;
        // Duplicate check in the new collection before detaching from the old.
        if let Some(children) = self.record(new_parent)?.children.get(&ty) {
            if let Some(existing) = children.get(&own_key) {
                if existing != id {
                    return Err(ModelError::duplicate_key(ty.name(), &own_key));
                }
            }
        }

        if let Some(old_parent) = old {
            self.record_mut(old_parent)?
                .children_mut(ty)
                .remove(&own_key)?;
            self.record_mut(id)?.parents.remove(&parent_type);
            self.sync_link(id, old_parent)?;
        }
        self.record_mut(new_parent)?
            .children_mut(ty)
            .add(own_key, id)?;
        self.record_mut(id)?.parents.insert(parent_type, new_parent);
        self.sync_link(id, new_parent)?;
        trace!(%ty, %id, %parent_type, "set parent reference");
        Ok(())
    }

    /// Persists a transient entity, or re-stores the snapshot of a
    /// persistent one.
    ///
    /// Before delegating to the store, revalidates: simple key non-blank
    /// (unless allowed), identifying parent and every mandatory parent set
    /// (after applying declared defaults), and - for top-level types - no
    /// existing entity with an equal key anywhere in the population. On
    /// success, operations deferred while the entity was transient are
    /// replayed in enqueue order.
    pub fn persist(&mut self, id: EntityId) -> ModelResult<()> {
        if self.txn != Some(TxnKind::Update) {
            return Err(ModelError::invalid_state(
                "persist requires an update transaction",
            ));
        }
        let (ty, lifecycle) = {
            let record = self.record(id)?;
            (record.entity_type, record.lifecycle)
        };
        match lifecycle {
            Lifecycle::Deleted => Err(ModelError::invalid_state("entity has been deleted")),
            Lifecycle::Persistent => self.restore(id),
            Lifecycle::Transient => self.persist_transient(id, ty),
        }
    }

    fn persist_transient(&mut self, id: EntityId, ty: EntityType) -> ModelResult<()> {
        let schema = Arc::clone(&self.schema);
        let def = schema.type_def(ty);

        // Type-specific defaulting for unset mandatory parents.
        for (parent_type, default_key) in def.defaults() {
            let unset = !self.record(id)?.parents.contains_key(parent_type);
            if unset {
                if let Some(default_row) = self.find_by_key(*parent_type, default_key, None)? {
                    self.set_parent(id, *parent_type, Some(default_row))?;
                }
            }
        }

        let (simple, identifying) = {
            let record = self.record(id)?;
            (record.simple_key.clone(), record.identifying_parent)
        };
        if simple.trim().is_empty() && !def.allows_blank_key() {
            return Err(ModelError::property("simpleKey", "must not be blank"));
        }
        if def.identifying_parent_type().is_some() && identifying.is_none() {
            return Err(ModelError::property(
                "identifyingParent",
                "must be set before persisting",
            ));
        }
        for (parent_type, relation) in schema.parents_of(ty) {
            if relation.is_mandatory()
                && def.identifying_parent_type() != Some(*parent_type)
                && !self.record(id)?.parents.contains_key(parent_type)
            {
                return Err(ModelError::property(
                    parent_type.name(),
                    "mandatory relation not set",
                ));
            }
        }
        if def.is_top_level() && self.find_duplicate_simple_key(ty, None, &simple)?.is_some() {
            return Err(ModelError::duplicate_key(
                ty.name(),
                EntityKey::top_level(&simple),
            ));
        }

        let payload = codec::encode(&self.snapshot(id)?)?;
        let oid = self.backend.store(None, ty.name(), payload)?;
        {
            let record = self.record_mut(id)?;
            record.oid = Some(oid);
            record.lifecycle = Lifecycle::Persistent;
        }
        self.by_oid.insert(oid, id);
        debug!(%ty, %oid, "persisted entity");

        // Snapshot again: persistent relatives omitted while we had no oid
        // are resolvable now, and relatives waiting on our oid are re-stored.
        self.restore(id)?;
        let deferred: Vec<DeferredOp> = self.record_mut(id)?.deferred.drain(..).collect();
        for op in deferred {
            match op {
                DeferredOp::RestoreRelative(relative) => self.restore(relative)?,
            }
        }
        Ok(())
    }

    /// Unpersists an entity.
    ///
    /// # Errors
    ///
    /// Fails with [`ModelError::ConstraintViolation`] while any child
    /// collection is non-empty; the message names each blocking child type
    /// and count. Detaches from non-identifying parents first and the
    /// identifying parent last before delegating removal to the store.
    pub fn unpersist(&mut self, id: EntityId) -> ModelResult<()> {
        if self.txn != Some(TxnKind::Update) {
            return Err(ModelError::invalid_state(
                "unpersist requires an update transaction",
            ));
        }
        let (ty, oid, identifying, blocking) = {
            let record = self.record(id)?;
            if !record.is_persistent() {
                return Err(ModelError::invalid_state(
                    "only persistent entities can be unpersisted",
                ));
            }
            let oid = record
                .oid
                .ok_or_else(|| ModelError::invalid_state("persistent entity has no oid"))?;
            (
                record.entity_type,
                oid,
                record.identifying_parent,
                record.blocking_children(),
            )
        };
        let own_key = self.key(id)?;

        if !blocking.is_empty() {
            let detail = blocking
                .iter()
                .map(|(child_type, count)| format!("{count} {child_type}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ModelError::constraint(format!(
                "cannot unpersist {ty} \"{own_key}\": still referenced by {detail}"
            )));
        }

        // Non-identifying parents first, identifying parent last.
        let parents: Vec<(EntityType, EntityId)> = self
            .record(id)?
            .parents
            .iter()
            .map(|(t, p)| (*t, *p))
            .collect();
        for (parent_type, parent) in parents {
            self.record_mut(parent)?.children_mut(ty).remove(&own_key)?;
            self.record_mut(id)?.parents.remove(&parent_type);
            self.restore(parent)?;
        }
        if let Some(parent) = identifying {
            self.record_mut(parent)?.children_mut(ty).remove(&own_key)?;
            self.record_mut(id)?.identifying_parent = None;
            self.restore(parent)?;
        }

        self.backend.remove(oid)?;
        self.by_oid.remove(&oid);
        {
            let record = self.record_mut(id)?;
            record.lifecycle = Lifecycle::Deleted;
            record.oid = None;
            record.deferred.clear();
        }
        debug!(%ty, %oid, "unpersisted entity");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup internals (shared with Finder)
    // ------------------------------------------------------------------

    /// Live persistent entities of a type, resolved through the store's
    /// type-scoped enumeration. Requires an active transaction.
    pub(crate) fn persistent_ids_of(&self, ty: EntityType) -> ModelResult<Vec<EntityId>> {
        if self.txn.is_none() {
            return Err(ModelError::invalid_state(
                "lookup requires an active transaction",
            ));
        }
        let mut out = Vec::new();
        for (oid, _) in self.backend.all_of_type(ty.name())? {
            let id = self.by_oid.get(&oid).ok_or_else(|| {
                ModelError::invalid_state(format!("store object {oid} is not loaded; refresh"))
            })?;
            out.push(*id);
        }
        Ok(out)
    }

    pub(crate) fn find_by_key(
        &self,
        ty: EntityType,
        simple_key: &str,
        identifying_parent: Option<EntityId>,
    ) -> ModelResult<Option<EntityId>> {
        for candidate in self.persistent_ids_of(ty)? {
            let record = self.record(candidate)?;
            if eq_ignore_case(&record.simple_key, simple_key)
                && record.identifying_parent == identifying_parent
            {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    pub(crate) fn find_duplicate_simple_key(
        &self,
        ty: EntityType,
        excluding: Option<Oid>,
        simple_key: &str,
    ) -> ModelResult<Option<EntityId>> {
        for candidate in self.persistent_ids_of(ty)? {
            let record = self.record(candidate)?;
            if let Some(own) = excluding {
                if record.oid == Some(own) {
                    continue;
                }
            }
            if eq_ignore_case(&record.simple_key, simple_key) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn record(&self, id: EntityId) -> ModelResult<&EntityRecord> {
        self.entities
            .get(&id)
            .ok_or_else(|| ModelError::unknown_entity(id))
    }

    fn record_mut(&mut self, id: EntityId) -> ModelResult<&mut EntityRecord> {
        self.entities
            .get_mut(&id)
            .ok_or_else(|| ModelError::unknown_entity(id))
    }

    /// Like [`record`](Self::record) but rejects deleted entities.
    fn live(&self, id: EntityId) -> ModelResult<&EntityRecord> {
        let record = self.record(id)?;
        if record.lifecycle == Lifecycle::Deleted {
            return Err(ModelError::invalid_state("entity has been deleted"));
        }
        Ok(record)
    }

    /// Mutating a persistent entity re-stores its snapshot, so it needs an
    /// update transaction before the arena is touched; failing later would
    /// leave the arena diverged from the store with nothing to abort.
    fn guard_persistent_mutation(&self, persistent: bool) -> ModelResult<()> {
        if persistent && self.txn != Some(TxnKind::Update) {
            return Err(ModelError::invalid_state(
                "mutating a persistent entity requires an update transaction",
            ));
        }
        Ok(())
    }

    /// The key `id` will carry once the pending change gives `root` the key
    /// `root_key`. Descendants reach `root` through their identifying chain.
    fn prospective_key(
        &self,
        id: EntityId,
        root: EntityId,
        root_key: &EntityKey,
    ) -> ModelResult<EntityKey> {
        if id == root {
            return Ok(root_key.clone());
        }
        let record = self.record(id)?;
        match record.identifying_parent {
            Some(parent) => Ok(EntityKey::new(
                record.simple_key.clone(),
                Some(self.prospective_key(parent, root, root_key)?),
            )),
            None => self.key(id),
        }
    }

    /// Checks every entry a re-filing pass will touch for a key collision
    /// with a different child, before anything is mutated.
    ///
    /// An entry found under its own prospective key (a case-only change, or
    /// an entry already filed there) is not a collision.
    fn check_refile_collisions(
        &self,
        affected: &[EntityId],
        root: EntityId,
        root_key: &EntityKey,
    ) -> ModelResult<()> {
        for &entity in affected {
            let new_key = self.prospective_key(entity, root, root_key)?;
            let (child_type, holders) = {
                let record = self.record(entity)?;
                let mut holders: Vec<EntityId> = record.parents.values().copied().collect();
                if let Some(parent) = record.identifying_parent {
                    holders.push(parent);
                }
                (record.entity_type, holders)
            };
            for holder in holders {
                if let Some(collection) = self.record(holder)?.children.get(&child_type) {
                    if let Some(existing) = collection.get(&new_key) {
                        if existing != entity {
                            return Err(ModelError::duplicate_key(child_type.name(), &new_key));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// The entity plus all descendants reached through identifying-parent
    /// links; their keys all embed this entity's key.
    fn identifying_subtree(&self, root: EntityId) -> ModelResult<Vec<EntityId>> {
        let mut out = vec![root];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let record = self.record(id)?;
            for collection in record.children.values() {
                for child in collection.ids() {
                    if self.record(child)?.identifying_parent == Some(id) {
                        out.push(child);
                        stack.push(child);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Re-files collection entries after a key-affecting change.
    ///
    /// `skip` names a (root, holder) entry already filed under its new key.
    fn refile_entries(
        &mut self,
        affected: &[EntityId],
        old_keys: &HashMap<EntityId, EntityKey>,
        skip: Option<(EntityId, EntityId)>,
    ) -> ModelResult<()> {
        for &entity in affected {
            let new_key = self.key(entity)?;
            let old_key = old_keys
                .get(&entity)
                .ok_or_else(|| ModelError::invalid_state("missing pre-change key"))?
                .clone();
            let (child_type, holders) = {
                let record = self.record(entity)?;
                let mut holders: Vec<EntityId> = record.parents.values().copied().collect();
                if let Some(parent) = record.identifying_parent {
                    holders.push(parent);
                }
                (record.entity_type, holders)
            };
            for holder in holders {
                if skip == Some((entity, holder)) {
                    continue;
                }
                self.record_mut(holder)?
                    .children_mut(child_type)
                    .rekey(&old_key, new_key.clone())?;
            }
        }
        Ok(())
    }

    /// Re-stores the snapshot of a persistent entity; no-op for others.
    fn restore(&mut self, id: EntityId) -> ModelResult<()> {
        let (ty, oid) = {
            let record = self.record(id)?;
            if !record.is_persistent() {
                return Ok(());
            }
            let oid = record
                .oid
                .ok_or_else(|| ModelError::invalid_state("persistent entity has no oid"))?;
            (record.entity_type, oid)
        };
        let payload = codec::encode(&self.snapshot(id)?)?;
        self.backend.store(Some(oid), ty.name(), payload)?;
        Ok(())
    }

    /// Keeps the store in step with a changed link between two entities.
    ///
    /// Persistent sides are re-stored immediately when the counterpart has an
    /// oid to reference; otherwise the re-store is queued on the transient
    /// side, to be replayed by the `persist` call that assigns its oid.
    fn sync_link(&mut self, a: EntityId, b: EntityId) -> ModelResult<()> {
        let a_persistent = self.record(a)?.is_persistent();
        let b_persistent = self.record(b)?.is_persistent();
        match (a_persistent, b_persistent) {
            (true, true) => {
                self.restore(a)?;
                self.restore(b)?;
            }
            (true, false) => {
                self.record_mut(b)?
                    .deferred
                    .push_back(DeferredOp::RestoreRelative(a));
            }
            (false, true) => {
                self.record_mut(a)?
                    .deferred
                    .push_back(DeferredOp::RestoreRelative(b));
            }
            (false, false) => {}
        }
        Ok(())
    }

    /// Builds the persisted form of an entity. Only persistent relatives
    /// appear; transient ones patch this snapshot later via their deferred
    /// queues.
    fn snapshot(&self, id: EntityId) -> ModelResult<EntityData> {
        let record = self.record(id)?;
        let persistent_oid = |relative: EntityId| -> Option<u64> {
            self.entities
                .get(&relative)
                .filter(|r| r.is_persistent())
                .and_then(|r| r.oid)
                .map(Oid::as_u64)
        };

        let identifying_parent = record.identifying_parent.and_then(persistent_oid);
        let parents = record
            .parents
            .iter()
            .filter_map(|(t, p)| persistent_oid(*p).map(|oid| (t.name().to_string(), oid)))
            .collect();
        let children = record
            .children
            .iter()
            .filter_map(|(t, collection)| {
                let oids: Vec<u64> = collection.ids().filter_map(persistent_oid).collect();
                if oids.is_empty() {
                    None
                } else {
                    Some((t.name().to_string(), oids))
                }
            })
            .collect();

        Ok(EntityData {
            simple_key: record.simple_key.clone(),
            identifying_parent,
            parents,
            children,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("entities", &self.entities.len())
            .field("in_transaction", &self.txn.is_some())
            .finish_non_exhaustive()
    }
}

fn record_in(
    entities: &HashMap<EntityId, EntityRecord>,
    id: EntityId,
) -> ModelResult<&EntityRecord> {
    entities
        .get(&id)
        .ok_or_else(|| ModelError::unknown_entity(id))
}

fn record_in_mut(
    entities: &mut HashMap<EntityId, EntityRecord>,
    id: EntityId,
) -> ModelResult<&mut EntityRecord> {
    entities
        .get_mut(&id)
        .ok_or_else(|| ModelError::unknown_entity(id))
}

/// Derives an entity's composite key recursively through its identifying
/// chain.
fn key_in(entities: &HashMap<EntityId, EntityRecord>, id: EntityId) -> ModelResult<EntityKey> {
    let record = record_in(entities, id)?;
    let parent = match record.identifying_parent {
        Some(parent) => Some(key_in(entities, parent)?),
        None => None,
    };
    Ok(EntityKey::new(record.simple_key.clone(), parent))
}

fn resolve_oid(by_oid: &HashMap<Oid, EntityId>, raw: u64) -> ModelResult<EntityId> {
    by_oid
        .get(&Oid::from_raw(raw))
        .copied()
        .ok_or_else(|| ModelError::codec(format!("snapshot references unknown oid {raw}")))
}
