//! Delegation path metrics storage: `<configDir>/memory/delegation_metrics.json`
//! (§6 persistent file layout).
//!
//! `(fromAgent, toAgent, contextType)` is a natural `HashMap` key in memory
//! (see [`crate::delegation::DelegationStrategy`]) but doesn't round-trip
//! through a JSON object key cleanly, so the on-disk document is a flat
//! list of [`crate::delegation::DelegationPathEntry`] rows instead —
//! the same "object-with-list-field" shape the teacher uses for its
//! queue-snapshot documents.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::delegation::DelegationPathEntry;

use super::json_file::JsonFileStore;
use super::StoreResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DelegationMetricsDocument {
    paths: Vec<DelegationPathEntry>,
}

/// Whole-file JSON store for the delegation path-stats table.
pub struct DelegationStore {
    inner: JsonFileStore<DelegationMetricsDocument>,
}

impl DelegationStore {
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Ok(Self {
            inner: JsonFileStore::open(path).await?,
        })
    }

    /// All persisted path entries, in no particular order.
    pub async fn load_all(&self) -> Vec<DelegationPathEntry> {
        self.inner.get().await.paths
    }

    /// Overwrite the persisted document with `entries`, typically the
    /// result of [`crate::delegation::DelegationStrategy::snapshot_stats`].
    pub async fn save_all(&self, entries: Vec<DelegationPathEntry>) -> StoreResult<()> {
        self.inner.replace(DelegationMetricsDocument { paths: entries }).await
    }
}
