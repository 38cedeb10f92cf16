//! Schema registry: built once, read-only afterwards.

use crate::schema::relation::{Relation, TypeDef};
use crate::types::EntityType;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building a schema registry.
///
/// These are declaration mistakes, not runtime conditions: a failed build
/// means the application's static relation table is wrong.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A relation or identifying-parent declaration references an undeclared type.
    #[error("relation references undeclared entity type: {name}")]
    UnknownType {
        /// The undeclared type name.
        name: &'static str,
    },

    /// The same entity type was declared twice.
    #[error("entity type declared twice: {name}")]
    DuplicateType {
        /// The doubly declared type name.
        name: &'static str,
    },

    /// The same (parent, child) pair was declared twice.
    #[error("relation declared twice: {parent} -> {child}")]
    DuplicateRelation {
        /// Parent type name.
        parent: &'static str,
        /// Child type name.
        child: &'static str,
    },

    /// The relation graph contains a cycle.
    #[error("relation cycle: {name} is its own ancestor")]
    Cycle {
        /// A type lying on the cycle.
        name: &'static str,
    },
}

/// Static metadata describing every persisted entity type and the
/// one-to-many relations between them.
///
/// Built once from the declared relation table and read-only afterwards; the
/// per-type parent and child relation maps are computed at build time. The
/// application installs one registry process-wide (see [`install_registry`]);
/// tests construct their own and hand it to the session directly.
#[derive(Debug)]
pub struct SchemaRegistry {
    types: BTreeMap<EntityType, TypeDef>,
    parents: BTreeMap<EntityType, BTreeMap<EntityType, Relation>>,
    children: BTreeMap<EntityType, BTreeMap<EntityType, Relation>>,
}

impl SchemaRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Returns the definition of an entity type.
    ///
    /// # Panics
    ///
    /// Panics if the type was never declared. Referencing an undeclared type
    /// is a programming error, not a recoverable condition.
    #[must_use]
    pub fn type_def(&self, entity_type: EntityType) -> &TypeDef {
        self.types
            .get(&entity_type)
            .unwrap_or_else(|| panic!("entity type not declared in schema: {entity_type}"))
    }

    /// Returns the parent-type relation map of a child type.
    ///
    /// The map includes the identifying relation when the type declares an
    /// identifying parent. Empty for types with no parents.
    ///
    /// # Panics
    ///
    /// Panics if the type was never declared.
    #[must_use]
    pub fn parents_of(&self, child: EntityType) -> &BTreeMap<EntityType, Relation> {
        self.parents
            .get(&child)
            .unwrap_or_else(|| panic!("entity type not declared in schema: {child}"))
    }

    /// Returns the child-type relation map of a parent type.
    ///
    /// # Panics
    ///
    /// Panics if the type was never declared.
    #[must_use]
    pub fn children_of(&self, parent: EntityType) -> &BTreeMap<EntityType, Relation> {
        self.children
            .get(&parent)
            .unwrap_or_else(|| panic!("entity type not declared in schema: {parent}"))
    }

    /// Returns whether the relation from `parent` to `child` is mandatory.
    ///
    /// # Panics
    ///
    /// Panics if no such relation was declared.
    #[must_use]
    pub fn is_mandatory(&self, parent: EntityType, child: EntityType) -> bool {
        self.parents_of(child)
            .get(&parent)
            .unwrap_or_else(|| panic!("relation not declared in schema: {parent} -> {child}"))
            .is_mandatory()
    }

    /// Returns all declared entity types in name order.
    pub fn entity_types(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.types.keys().copied()
    }
}

/// Accumulates type and relation declarations, then validates and builds an
/// immutable [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<TypeDef>,
    relations: Vec<Relation>,
}

impl SchemaBuilder {
    /// Declares an entity type.
    #[must_use]
    pub fn entity(mut self, def: TypeDef) -> Self {
        self.types.push(def);
        self
    }

    /// Declares a non-identifying one-to-many relation.
    ///
    /// Identifying relations are declared on the child's [`TypeDef`] instead
    /// and are folded in as mandatory automatically.
    #[must_use]
    pub fn relation(mut self, parent: EntityType, child: EntityType, mandatory: bool) -> Self {
        self.relations.push(Relation::new(parent, child, mandatory));
        self
    }

    /// Validates the declarations and builds the registry.
    ///
    /// # Errors
    ///
    /// Fails on duplicate type or relation declarations, references to
    /// undeclared types, or a cycle in the relation graph.
    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut types = BTreeMap::new();
        for def in self.types {
            let name = def.name();
            if types.insert(name, def).is_some() {
                return Err(SchemaError::DuplicateType { name: name.name() });
            }
        }

        // Fold identifying relations into the declared set.
        let mut relations = self.relations;
        for def in types.values() {
            if let Some(parent) = def.identifying_parent_type() {
                relations.push(Relation::new(parent, def.name(), true));
            }
        }

        let mut parents: BTreeMap<EntityType, BTreeMap<EntityType, Relation>> =
            types.keys().map(|t| (*t, BTreeMap::new())).collect();
        let mut children = parents.clone();

        for relation in &relations {
            for endpoint in [relation.parent(), relation.child()] {
                if !types.contains_key(&endpoint) {
                    return Err(SchemaError::UnknownType {
                        name: endpoint.name(),
                    });
                }
            }
            let by_parent = children
                .get_mut(&relation.parent())
                .expect("endpoint checked above");
            if by_parent.insert(relation.child(), *relation).is_some() {
                return Err(SchemaError::DuplicateRelation {
                    parent: relation.parent().name(),
                    child: relation.child().name(),
                });
            }
            parents
                .get_mut(&relation.child())
                .expect("endpoint checked above")
                .insert(relation.parent(), *relation);
        }

        detect_cycle(&children)?;

        Ok(SchemaRegistry {
            types,
            parents,
            children,
        })
    }
}

/// Depth-first search for a type that is its own ancestor.
fn detect_cycle(
    children: &BTreeMap<EntityType, BTreeMap<EntityType, Relation>>,
) -> Result<(), SchemaError> {
    let mut done = BTreeSet::new();
    let mut path = BTreeSet::new();

    fn visit(
        node: EntityType,
        children: &BTreeMap<EntityType, BTreeMap<EntityType, Relation>>,
        done: &mut BTreeSet<EntityType>,
        path: &mut BTreeSet<EntityType>,
    ) -> Result<(), SchemaError> {
        if done.contains(&node) {
            return Ok(());
        }
        if !path.insert(node) {
            return Err(SchemaError::Cycle { name: node.name() });
        }
        if let Some(edges) = children.get(&node) {
            for next in edges.keys() {
                visit(*next, children, done, path)?;
            }
        }
        path.remove(&node);
        done.insert(node);
        Ok(())
    }

    for node in children.keys() {
        visit(*node, children, &mut done, &mut path)?;
    }
    Ok(())
}

static GLOBAL: RwLock<Option<Arc<SchemaRegistry>>> = RwLock::new(None);

/// Installs the process-wide schema registry.
///
/// # Panics
///
/// Panics if a registry was already installed; the application schema is
/// declared exactly once. Tests use [`replace_registry`].
pub fn install_registry(registry: Arc<SchemaRegistry>) {
    let mut slot = GLOBAL.write();
    assert!(slot.is_none(), "schema registry already installed");
    *slot = Some(registry);
}

/// Replaces the process-wide schema registry, returning the previous one.
///
/// Intended for test isolation only.
pub fn replace_registry(registry: Arc<SchemaRegistry>) -> Option<Arc<SchemaRegistry>> {
    GLOBAL.write().replace(registry)
}

/// Returns the process-wide schema registry.
///
/// # Panics
///
/// Panics if no registry has been installed.
#[must_use]
pub fn global_registry() -> Arc<SchemaRegistry> {
    GLOBAL
        .read()
        .clone()
        .expect("no schema registry installed")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENRE: EntityType = EntityType::new("Genre");
    const LOCATION: EntityType = EntityType::new("Location");
    const EVENT: EntityType = EntityType::new("Event");

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .entity(TypeDef::new(GENRE))
            .entity(TypeDef::new(LOCATION))
            .entity(TypeDef::new(EVENT).identifying_parent(LOCATION))
            .relation(GENRE, EVENT, false)
            .build()
            .unwrap()
    }

    #[test]
    fn identifying_relation_is_folded_in_as_mandatory() {
        let registry = registry();
        let parents = registry.parents_of(EVENT);
        assert_eq!(parents.len(), 2);
        assert!(parents.get(&LOCATION).unwrap().is_mandatory());
        assert!(!parents.get(&GENRE).unwrap().is_mandatory());
        assert!(registry.is_mandatory(LOCATION, EVENT));
        assert!(!registry.is_mandatory(GENRE, EVENT));
    }

    #[test]
    fn children_maps_are_derived() {
        let registry = registry();
        assert_eq!(registry.children_of(LOCATION).len(), 1);
        assert_eq!(registry.children_of(GENRE).len(), 1);
        assert!(registry.children_of(EVENT).is_empty());
        assert!(registry.parents_of(LOCATION).is_empty());
    }

    #[test]
    fn unknown_type_in_relation_is_rejected() {
        let err = SchemaRegistry::builder()
            .entity(TypeDef::new(LOCATION))
            .relation(LOCATION, EVENT, false)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { name: "Event" }));
    }

    #[test]
    fn duplicate_relation_is_rejected() {
        let err = SchemaRegistry::builder()
            .entity(TypeDef::new(LOCATION))
            .entity(TypeDef::new(EVENT))
            .relation(LOCATION, EVENT, false)
            .relation(LOCATION, EVENT, true)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateRelation { .. }));
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let err = SchemaRegistry::builder()
            .entity(TypeDef::new(LOCATION))
            .entity(TypeDef::new(LOCATION))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateType { .. }));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = SchemaRegistry::builder()
            .entity(TypeDef::new(LOCATION))
            .entity(TypeDef::new(EVENT))
            .relation(LOCATION, EVENT, false)
            .relation(EVENT, LOCATION, false)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Cycle { .. }));
    }

    #[test]
    #[should_panic(expected = "not declared in schema")]
    fn undeclared_type_lookup_panics() {
        registry().parents_of(EntityType::new("Nope"));
    }

    #[test]
    fn entity_types_are_enumerable() {
        let names: Vec<_> = registry().entity_types().map(EntityType::name).collect();
        assert_eq!(names, vec!["Event", "Genre", "Location"]);
    }
}
