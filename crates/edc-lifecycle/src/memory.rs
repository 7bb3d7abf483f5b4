//! In-memory reference implementation of [`ResponseStore`].
//!
//! One lock guards responses, audit entries, and signatures so a commit is
//! never observed half-applied.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::record::{AuditEntry, Response, SignatureRecord};
use crate::store::{ResponseCommit, ResponseStore};

#[derive(Default)]
struct State {
    responses: HashMap<Uuid, Response>,
    audit: Vec<AuditEntry>,
    signatures: Vec<SignatureRecord>,
}

/// Serializable image of a store, used by file-backed tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub responses: Vec<Response>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
    #[serde(default)]
    pub signatures: Vec<SignatureRecord>,
}

#[derive(Default)]
pub struct InMemoryResponseStore {
    state: RwLock<State>,
}

impl InMemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let responses = snapshot
            .responses
            .into_iter()
            .map(|response| (response.id, response))
            .collect();
        Self {
            state: RwLock::new(State {
                responses,
                audit: snapshot.audit,
                signatures: snapshot.signatures,
            }),
        }
    }

    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let state = self.read()?;
        let mut responses: Vec<_> = state.responses.values().cloned().collect();
        responses.sort_by_key(|response| (response.created_at, response.id));
        Ok(StoreSnapshot {
            responses,
            audit: state.audit.clone(),
            signatures: state.signatures.clone(),
        })
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("response store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("response store lock poisoned".to_string()))
    }
}

impl ResponseStore for InMemoryResponseStore {
    fn load(&self, id: Uuid) -> StoreResult<Response> {
        self.read()?
            .responses
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn insert(&self, response: Response, audit: AuditEntry) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.responses.contains_key(&response.id) {
            return Err(StoreError::Duplicate(response.id));
        }
        state.responses.insert(response.id, response);
        state.audit.push(audit);
        Ok(())
    }

    fn commit(&self, commit: ResponseCommit) -> StoreResult<()> {
        let mut state = self.write()?;
        let id = commit.response.id;
        let stored = state
            .responses
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        if stored.updated_at != commit.expected_updated_at {
            return Err(StoreError::Conflict(id));
        }
        *stored = commit.response;
        state.audit.push(commit.audit);
        if let Some(signature) = commit.signature {
            state.signatures.push(signature);
        }
        Ok(())
    }

    fn audit_trail(&self, id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        let state = self.read()?;
        if !state.responses.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(state
            .audit
            .iter()
            .filter(|entry| entry.response_id == id)
            .cloned()
            .collect())
    }

    fn signatures(&self, id: Uuid) -> StoreResult<Vec<SignatureRecord>> {
        let state = self.read()?;
        if !state.responses.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(state
            .signatures
            .iter()
            .filter(|record| record.response_id == id)
            .cloned()
            .collect())
    }
}
