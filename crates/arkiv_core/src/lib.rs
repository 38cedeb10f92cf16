//! # arkiv Core
//!
//! Entity-relationship consistency engine for arkiv.
//!
//! This crate reimplements, entirely in application code over a transactional
//! object store, the guarantees a relational engine normally gives for free:
//!
//! - Unique composite keys ([`EntityKey`]), case-insensitive, scoped per
//!   identifying parent or global for top-level types
//! - Mandatory/optional relation enforcement declared once in a
//!   [`SchemaRegistry`]
//! - Cascading consistency when a parent reference changes, with both sides
//!   of every relation updated in one logical mutation
//! - Referential-integrity protection on deletion
//!
//! Entities live in an arena owned by a [`Session`]; parent references and
//! child collections hold [`EntityId`] handles, never owning references. The
//! session consumes a store through [`arkiv_store::ObjectBackend`] and keeps
//! the in-memory graph and the persisted snapshots mutually consistent.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod entity;
mod error;
mod key;
mod lookup;
mod schema;
mod types;

pub use arkiv_store::Oid;
pub use collection::SortedChildren;
pub use entity::{EntityId, Session};
pub use error::{ModelError, ModelResult};
pub use key::EntityKey;
pub use lookup::Finder;
pub use schema::{
    global_registry, install_registry, replace_registry, Relation, SchemaBuilder, SchemaError,
    SchemaRegistry, TypeDef,
};
pub use types::EntityType;
