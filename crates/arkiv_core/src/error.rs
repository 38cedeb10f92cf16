//! Error types for the arkiv consistency engine.

use thiserror::Error;

/// Result type for engine operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur in engine operations.
///
/// The taxonomy separates expected, recoverable **validation** failures
/// (blank field, duplicate key, missing mandatory relation, delete blocked by
/// children) from **structural** misuse and store faults. Validation is
/// always eager and never auto-repairing; the variant carries the offending
/// property name where one exists.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Backing store error.
    #[error("store error: {0}")]
    Store(#[from] arkiv_store::StoreError),

    /// A model-level constraint was violated.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// A constraint on a single property was violated.
    #[error("invalid value for {property}: {message}")]
    PropertyConstraintViolation {
        /// The offending property.
        property: String,
        /// Description of the violation.
        message: String,
    },

    /// An entity with an equal key already exists in the relevant scope.
    #[error("duplicate key for {entity_type}: {key}")]
    DuplicateKey {
        /// The entity type of the collision.
        entity_type: String,
        /// Rendering of the colliding key.
        key: String,
    },

    /// The key names no entry in the collection.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// Rendering of the missing key.
        key: String,
    },

    /// A lookup by key found no matching entity.
    #[error("{entity_type} \"{key}\" cannot be found")]
    NotFound {
        /// The entity type searched.
        entity_type: String,
        /// The key searched for.
        key: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The entity handle names no entity in the session arena.
    #[error("unknown entity handle: {id}")]
    UnknownEntity {
        /// The handle that was not found.
        id: String,
    },

    /// Snapshot encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },
}

impl ModelError {
    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a property constraint violation error.
    pub fn property(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PropertyConstraintViolation {
            property: property.into(),
            message: message.into(),
        }
    }

    /// Creates a duplicate key error.
    pub fn duplicate_key(entity_type: impl Into<String>, key: impl ToString) -> Self {
        Self::DuplicateKey {
            entity_type: entity_type.into(),
            key: key.to_string(),
        }
    }

    /// Creates a key-not-found error.
    pub fn key_not_found(key: impl ToString) -> Self {
        Self::KeyNotFound {
            key: key.to_string(),
        }
    }

    /// Creates a lookup-miss error.
    pub fn not_found(entity_type: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            key: key.to_string(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an unknown-entity error.
    pub fn unknown_entity(id: impl ToString) -> Self {
        Self::UnknownEntity { id: id.to_string() }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}
