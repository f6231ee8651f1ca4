//! Workflow-level error types.

use serde_json::Value;
use thiserror::Error;

use crate::validation::ValidationError;

/// Top-level errors for workflow construction, execution, and scheduling.
#[derive(Debug, Error, Clone)]
pub enum WorkflowError {
    /// Invalid workflow or schedule construction. Surfaced synchronously,
    /// never retried.
    #[error("{0}")]
    Configuration(String),
    /// An input, result, suspend, or resume payload failed schema validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// A step body failed. The triggering error is preserved verbatim.
    #[error("Step '{step_id}' failed: {message}")]
    StepExecution {
        step_id: String,
        step_index: usize,
        message: String,
        detail: Option<Value>,
    },
    /// Resume attempted with a checkpoint older than the persisted state.
    #[error("Stale resume for execution '{execution_id}': sequence {requested} is behind {persisted}")]
    StaleResume {
        execution_id: String,
        requested: u64,
        persisted: u64,
    },
    /// Resume targets an unknown or already-terminal execution.
    #[error("Execution is not resumable: {0}")]
    NotResumable(String),
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
    #[error("Internal error: {0}")]
    Internal(String),
}
