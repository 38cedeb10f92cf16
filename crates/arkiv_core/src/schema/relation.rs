//! Relation and entity-type metadata.

use crate::types::EntityType;
use std::fmt;

/// A declared one-to-many relation between two entity types.
///
/// Relations are read-only once constructed. The full declared set must form
/// a directed acyclic graph over entity types: no type may be its own
/// ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    parent: EntityType,
    child: EntityType,
    mandatory: bool,
}

impl Relation {
    /// Creates a relation from parent type to child type.
    #[must_use]
    pub const fn new(parent: EntityType, child: EntityType, mandatory: bool) -> Self {
        Self {
            parent,
            child,
            mandatory,
        }
    }

    /// Returns the parent entity type.
    #[must_use]
    pub const fn parent(&self) -> EntityType {
        self.parent
    }

    /// Returns the child entity type.
    #[must_use]
    pub const fn child(&self) -> EntityType {
        self.child
    }

    /// Returns whether the child must hold this parent reference to persist.
    #[must_use]
    pub const fn is_mandatory(&self) -> bool {
        self.mandatory
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.mandatory { "mandatory" } else { "optional" };
        write!(f, "{} -> {} ({kind})", self.parent, self.child)
    }
}

/// Per-type metadata: the compile-time replacement for the original's
/// attribute-driven reflection.
///
/// A type declaring an identifying parent gets its composite key scoped to
/// that parent; the identifying relation is implicitly mandatory. Types may
/// opt in to a blank simple key (used by a small number of "default"
/// singleton rows) and may declare a default row, by simple key, for a
/// mandatory parent relation the caller left unset at persist time.
#[derive(Debug, Clone)]
pub struct TypeDef {
    name: EntityType,
    identifying_parent: Option<EntityType>,
    allows_blank_key: bool,
    defaults: Vec<(EntityType, String)>,
}

impl TypeDef {
    /// Creates a type definition with no identifying parent.
    #[must_use]
    pub fn new(name: EntityType) -> Self {
        Self {
            name,
            identifying_parent: None,
            allows_blank_key: false,
            defaults: Vec::new(),
        }
    }

    /// Declares the identifying-parent type.
    #[must_use]
    pub fn identifying_parent(mut self, parent: EntityType) -> Self {
        self.identifying_parent = Some(parent);
        self
    }

    /// Opts in to a blank simple key.
    #[must_use]
    pub fn allow_blank_key(mut self) -> Self {
        self.allows_blank_key = true;
        self
    }

    /// Declares a default row for a mandatory parent relation, looked up by
    /// its top-level simple key at persist time when the caller left the
    /// parent unset.
    #[must_use]
    pub fn default_parent(mut self, parent: EntityType, simple_key: impl Into<String>) -> Self {
        self.defaults.push((parent, simple_key.into()));
        self
    }

    /// Returns the entity type this definition describes.
    #[must_use]
    pub fn name(&self) -> EntityType {
        self.name
    }

    /// Returns the declared identifying-parent type, if any.
    #[must_use]
    pub fn identifying_parent_type(&self) -> Option<EntityType> {
        self.identifying_parent
    }

    /// Returns whether this type is top-level (no identifying parent).
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.identifying_parent.is_none()
    }

    /// Returns whether a blank simple key is permitted.
    #[must_use]
    pub fn allows_blank_key(&self) -> bool {
        self.allows_blank_key
    }

    /// Returns the declared mandatory-parent defaults.
    #[must_use]
    pub fn defaults(&self) -> &[(EntityType, String)] {
        &self.defaults
    }
}
