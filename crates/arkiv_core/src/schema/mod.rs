//! Declarative schema metadata: relations, type definitions, registry.

mod registry;
mod relation;

pub use registry::{
    global_registry, install_registry, replace_registry, SchemaBuilder, SchemaError, SchemaRegistry,
};
pub use relation::{Relation, TypeDef};
