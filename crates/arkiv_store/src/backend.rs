//! Object-store backend trait definition.

use crate::error::StoreResult;
use crate::oid::Oid;

/// A transactional object store consumed by the arkiv engine.
///
/// Backends hold **opaque payloads** tagged with an entity-type name. They
/// provide durable create/update/delete keyed by [`Oid`] and a type-scoped
/// enumeration of live objects. The engine owns payload interpretation and
/// every consistency rule; backends never inspect payloads.
///
/// # Invariants
///
/// - At most one transaction is active at a time (single logical writer)
/// - `store` and `remove` require an active update transaction
/// - `all_of_type` requires an active transaction of either kind and, inside
///   an update transaction, reflects that transaction's own writes
/// - `commit` makes the update transaction's effects durable; `abort`
///   discards them entirely
/// - Oids are assigned by the backend and never reused
pub trait ObjectBackend: Send {
    /// Begins a read-only transaction.
    ///
    /// # Errors
    ///
    /// Fails if a transaction is already active.
    fn begin_read(&mut self) -> StoreResult<()>;

    /// Begins an update transaction.
    ///
    /// # Errors
    ///
    /// Fails if a transaction is already active.
    fn begin_update(&mut self) -> StoreResult<()>;

    /// Commits the active transaction.
    ///
    /// Committing a read transaction simply closes it.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is active.
    fn commit(&mut self) -> StoreResult<()>;

    /// Aborts the active transaction, discarding any uncommitted writes.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is active.
    fn abort(&mut self) -> StoreResult<()>;

    /// Stores a payload, inserting (`oid == None`) or updating in place.
    ///
    /// Returns the oid of the stored object. An update keeps the existing
    /// oid; the `tag` of an existing object must not change.
    ///
    /// # Errors
    ///
    /// Fails outside an update transaction, or if `oid` names no live object.
    fn store(&mut self, oid: Option<Oid>, tag: &str, payload: Vec<u8>) -> StoreResult<Oid>;

    /// Removes the object with the given oid.
    ///
    /// # Errors
    ///
    /// Fails outside an update transaction, or if `oid` names no live object.
    fn remove(&mut self, oid: Oid) -> StoreResult<()>;

    /// Enumerates all live objects carrying the given tag.
    ///
    /// Results are ordered by oid. Inside an update transaction the
    /// enumeration reflects that transaction's own uncommitted writes.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is active.
    fn all_of_type(&self, tag: &str) -> StoreResult<Vec<(Oid, Vec<u8>)>>;
}
