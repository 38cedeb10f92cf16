//! Error types for store operations.

use crate::oid::Oid;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An operation required an active transaction and none was open.
    #[error("no active transaction")]
    NoTransaction,

    /// A transaction was already active when another begin was attempted.
    #[error("a transaction is already active")]
    TransactionActive,

    /// A mutation was attempted inside a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    /// The oid does not name a live object.
    #[error("unknown oid: {oid}")]
    UnknownOid {
        /// The oid that was not found.
        oid: Oid,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates an unknown-oid error.
    pub fn unknown_oid(oid: Oid) -> Self {
        Self::UnknownOid { oid }
    }
}
