//! Top-level error taxonomy for the orchestration core.
//!
//! Variants track the *kinds* named in the error-handling design, not the
//! fine-grained tool-error categories the Reflector classifies — those stay
//! data (`crate::reflector::ReflectionCategory`) so the pattern table can grow
//! without widening this enum.

use thiserror::Error;

/// Crate-wide result alias, mirrored on the teacher's `DomainResult<T>`.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Error kinds surfaced across the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Empty or otherwise invalid user prompt.
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    /// An agent type was referenced that has no registered template.
    #[error("unknown agent type: {0}")]
    UnknownAgentType(String),

    /// A proposed plan was rejected by the external permission collaborator.
    #[error("plan rejected: {0}")]
    PlanRejected(String),

    /// A tool-execution error that was not retried to success. Carries the
    /// tool name and the underlying text so the caller can still surface it
    /// to the model as a tool response.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Name of the failing tool.
        tool: String,
        /// Raw error text returned by the tool.
        message: String,
    },

    /// The model/transport layer failed outright; the current turn aborts.
    #[error("model transport error: {0}")]
    ModelTransport(String),

    /// The model returned an empty response body.
    #[error("model returned empty response")]
    EmptyModelResponse,

    /// A streamed response chunk failed mid-stream.
    #[error("stream chunk error: {0}")]
    StreamChunk(String),

    /// The governing context was cancelled before the operation completed.
    #[error("context cancelled")]
    ContextCancelled,

    /// A blocking operation exceeded its configured deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The planner could not parse any candidate actions from the model.
    #[error("planner produced no parseable steps")]
    NoStepsParsed,

    /// `replanCount` reached `maxReplans` for a tree.
    #[error("max replans ({0}) exceeded")]
    MaxReplansExceeded(u32),

    /// Replanning was attempted on the root node, which is never replannable.
    #[error("root node failure is not replannable")]
    RootFailureNotReplannable,

    /// Decomposition was attempted starting from the tree root.
    #[error("decomposition from root is not supported")]
    DecompositionFromRoot,

    /// A coordinator task id was not found in the task index.
    #[error("task not found: {0}")]
    TaskNotFound(uuid::Uuid),

    /// A dependency cycle was detected among coordinated tasks.
    #[error("dependency cycle detected")]
    DependencyCycle,

    /// `waitWithTimeout` exceeded its deadline without the task set
    /// reaching quiescence.
    #[error("coordinator wait timed out")]
    CoordinatorTimeout,

    /// Wraps a persistent-store failure (see [`crate::stores::StoreError`]).
    #[error("storage error: {0}")]
    Storage(#[from] crate::stores::StoreError),

    /// Wraps a shared-memory bus failure.
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    /// Catch-all for `serde_json` (de)serialization failures crossing a
    /// public boundary (checkpoint load/save, decomposition JSON parsing).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
