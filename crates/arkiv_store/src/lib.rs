//! # arkiv Store
//!
//! Backing-store contract for the arkiv consistency engine.
//!
//! The engine consumes the store through the [`ObjectBackend`] trait and
//! nothing else: a transaction boundary, a persist/unpersist primitive keyed
//! by [`Oid`], and a type-scoped enumeration of live objects. Backends are
//! **opaque payload stores** - they do not interpret the entity snapshots
//! they hold; the core owns all encoding and every consistency rule.
//!
//! ## Available backends
//!
//! - [`InMemoryBackend`] - for testing and ephemeral embedding
//!
//! ## Example
//!
//! ```rust
//! use arkiv_store::{InMemoryBackend, ObjectBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.begin_update().unwrap();
//! let oid = backend.store(None, "Location", b"payload".to_vec()).unwrap();
//! backend.commit().unwrap();
//!
//! backend.begin_read().unwrap();
//! let all = backend.all_of_type("Location").unwrap();
//! assert_eq!(all, vec![(oid, b"payload".to_vec())]);
//! backend.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod oid;

pub use backend::ObjectBackend;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBackend;
pub use oid::Oid;
