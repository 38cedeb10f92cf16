//! Entity base: arena handles, per-entity state, and the session state machine.

mod codec;
mod id;
mod record;
mod session;

pub use id::EntityId;
pub use session::Session;

pub(crate) use record::{DeferredOp, EntityRecord, Lifecycle};
