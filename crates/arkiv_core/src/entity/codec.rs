//! Entity snapshot encoding.
//!
//! Snapshots are the opaque payloads handed to the backing store: CBOR maps
//! carrying the simple key and the oids of persistent relatives. Transient
//! relatives never appear in a snapshot; they patch their relatives through
//! the deferred queue once they gain an oid.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};

/// Persisted form of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct EntityData {
    /// The entity's own identifying string.
    pub simple_key: String,
    /// Oid of the identifying parent, when one is set and persistent.
    pub identifying_parent: Option<u64>,
    /// Non-identifying parent oids by parent type name.
    pub parents: Vec<(String, u64)>,
    /// Child oids by child type name, ascending by key at encode time.
    pub children: Vec<(String, Vec<u64>)>,
}

/// Encodes a snapshot to CBOR.
pub(crate) fn encode(data: &EntityData) -> ModelResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(data, &mut buf).map_err(|e| ModelError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a snapshot from CBOR.
pub(crate) fn decode(bytes: &[u8]) -> ModelResult<EntityData> {
    ciborium::de::from_reader(bytes).map_err(|e| ModelError::codec(e.to_string()))
}
