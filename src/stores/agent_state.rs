//! Agent state storage: one JSON document per agent under
//! `<configDir>/agents/<agentId>.json` (§6 persistent file layout).
//!
//! Grounded on the teacher's per-entity repository file (one JSON document
//! keyed by id) generalized from the checkpoint directory's multi-version
//! layout to a single current-state document per agent.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::json_file::atomic_write_json;
use super::{StoreError, StoreResult};

/// One JSON file per agent id, holding its current (non-versioned) state.
/// Unlike [`super::checkpoint::CheckpointStore`] this keeps exactly one
/// document per agent rather than a history of snapshots.
pub struct AgentStateStore {
    dir: PathBuf,
}

impl AgentStateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, agent_id: Uuid) -> PathBuf {
        self.dir.join(format!("{agent_id}.json"))
    }

    /// Persist `state` as `agentId`'s current document, overwriting any
    /// prior state.
    pub async fn save<T: Serialize + Sync>(&self, agent_id: Uuid, state: &T) -> StoreResult<()> {
        atomic_write_json(&self.path_for(agent_id), state).await
    }

    /// Load `agentId`'s current document, if one exists.
    pub async fn load<T: DeserializeOwned>(&self, agent_id: Uuid) -> StoreResult<Option<T>> {
        let path = self.path_for(agent_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state = serde_json::from_slice(&bytes).map_err(|source| StoreError::CorruptFormat {
                    path: path.display().to_string(),
                    source,
                })?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::IoFailure {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Remove `agentId`'s document, if present. A missing file is not an
    /// error, per §4.3's "readers tolerate missing file as empty".
    pub async fn delete(&self, agent_id: Uuid) -> StoreResult<()> {
        let path = self.path_for(agent_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::IoFailure {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct State {
        turn: u32,
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStateStore::new(dir.path());
        let agent_id = Uuid::new_v4();
        store.save(agent_id, &State { turn: 7 }).await.unwrap();
        let loaded: Option<State> = store.load(agent_id).await.unwrap();
        assert_eq!(loaded, Some(State { turn: 7 }));
    }

    #[tokio::test]
    async fn load_missing_agent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStateStore::new(dir.path());
        let loaded: Option<State> = store.load(Uuid::new_v4()).await.unwrap();
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn save_overwrites_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStateStore::new(dir.path());
        let agent_id = Uuid::new_v4();
        store.save(agent_id, &State { turn: 1 }).await.unwrap();
        store.save(agent_id, &State { turn: 2 }).await.unwrap();
        let loaded: Option<State> = store.load(agent_id).await.unwrap();
        assert_eq!(loaded, Some(State { turn: 2 }));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStateStore::new(dir.path());
        let agent_id = Uuid::new_v4();
        store.save(agent_id, &State { turn: 1 }).await.unwrap();
        store.delete(agent_id).await.unwrap();
        store.delete(agent_id).await.unwrap();
        let loaded: Option<State> = store.load(agent_id).await.unwrap();
        assert_eq!(loaded, None);
    }
}
