//! In-memory object-store backend.

use crate::backend::ObjectBackend;
use crate::error::{StoreError, StoreResult};
use crate::oid::Oid;
use std::collections::BTreeMap;

/// In-memory backend for testing and ephemeral embedding.
///
/// Update transactions operate on a cloned copy of the committed state:
/// `commit` swaps the copy in, `abort` drops it. This gives the all-or-nothing
/// transaction semantics the engine relies on without any durability.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    committed: State,
    txn: Option<Txn>,
}

#[derive(Debug, Clone, Default)]
struct State {
    next_oid: u64,
    objects: BTreeMap<Oid, StoredObject>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    tag: String,
    payload: Vec<u8>,
}

#[derive(Debug)]
enum Txn {
    Read,
    Update(State),
}

impl InMemoryBackend {
    /// Creates a new, empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live objects in committed state.
    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.committed.objects.len()
    }

    fn visible_state(&self) -> StoreResult<&State> {
        match &self.txn {
            Some(Txn::Read) => Ok(&self.committed),
            Some(Txn::Update(working)) => Ok(working),
            None => Err(StoreError::NoTransaction),
        }
    }

    fn working_state(&mut self) -> StoreResult<&mut State> {
        match &mut self.txn {
            Some(Txn::Update(working)) => Ok(working),
            Some(Txn::Read) => Err(StoreError::ReadOnlyTransaction),
            None => Err(StoreError::NoTransaction),
        }
    }
}

impl ObjectBackend for InMemoryBackend {
    fn begin_read(&mut self) -> StoreResult<()> {
        if self.txn.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.txn = Some(Txn::Read);
        Ok(())
    }

    fn begin_update(&mut self) -> StoreResult<()> {
        if self.txn.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.txn = Some(Txn::Update(self.committed.clone()));
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        match self.txn.take() {
            Some(Txn::Update(working)) => {
                self.committed = working;
                Ok(())
            }
            Some(Txn::Read) => Ok(()),
            None => Err(StoreError::NoTransaction),
        }
    }

    fn abort(&mut self) -> StoreResult<()> {
        match self.txn.take() {
            Some(_) => Ok(()),
            None => Err(StoreError::NoTransaction),
        }
    }

    fn store(&mut self, oid: Option<Oid>, tag: &str, payload: Vec<u8>) -> StoreResult<Oid> {
        let working = self.working_state()?;
        match oid {
            Some(oid) => {
                let object = working
                    .objects
                    .get_mut(&oid)
                    .ok_or(StoreError::UnknownOid { oid })?;
                object.payload = payload;
                Ok(oid)
            }
            None => {
                working.next_oid += 1;
                let oid = Oid::from_raw(working.next_oid);
                working.objects.insert(
                    oid,
                    StoredObject {
                        tag: tag.to_string(),
                        payload,
                    },
                );
                Ok(oid)
            }
        }
    }

    fn remove(&mut self, oid: Oid) -> StoreResult<()> {
        let working = self.working_state()?;
        working
            .objects
            .remove(&oid)
            .map(|_| ())
            .ok_or(StoreError::UnknownOid { oid })
    }

    fn all_of_type(&self, tag: &str) -> StoreResult<Vec<(Oid, Vec<u8>)>> {
        let state = self.visible_state()?;
        Ok(state
            .objects
            .iter()
            .filter(|(_, object)| object.tag == tag)
            .map(|(oid, object)| (*oid, object.payload.clone()))
            .collect())
    }
}
