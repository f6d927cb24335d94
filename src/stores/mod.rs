//! Persistent Stores (§4.3): on-disk JSON, one file per subsystem, written
//! with a whole-file atomic rewrite so a crash mid-save never corrupts the
//! previous snapshot.
//!
//! Grounded on the teacher's file-layout conventions under
//! `infrastructure/database/` (one repository type per subsystem) and on
//! `Toasterson-akh-medu`'s `store/durable.rs` open/get/put/remove shape,
//! adapted from a transactional KV engine to whole-file JSON since the spec
//! calls for plain files, not an embedded database.

pub mod agent_state;
pub mod checkpoint;
pub mod delegation_metrics;
pub mod json_file;
pub mod prompt_variants;

pub use agent_state::AgentStateStore;
pub use checkpoint::CheckpointStore;
pub use delegation_metrics::DelegationStore;
pub use json_file::JsonFileStore;
pub use prompt_variants::{PromptVariant, PromptVariantStore};

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Error kinds a persistent store can return, per §4.3.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt store format at {path}: {source}")]
    CorruptFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("io failure on {path}: {source}")]
    IoFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
