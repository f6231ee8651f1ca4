//! Errors raised by step bodies during execution.

use serde_json::Value;
use thiserror::Error;

/// Errors produced while executing a single workflow step.
///
/// The `Suspended` variant is not a failure: the runner translates it into a
/// suspended execution with a checkpoint. Everything else terminates the run
/// with an `Error` status, preserving the original error for the caller.
#[derive(Debug, Error, Clone)]
pub enum StepError {
    #[error("{message}")]
    Execution {
        message: String,
        detail: Option<Value>,
    },
    #[error("Step suspended{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Suspended { reason: Option<String> },
    #[error("Sub-workflow not found: {0}")]
    SubWorkflowNotFound(String),
    #[error("Suspension inside a parallel branch is not supported")]
    SuspendedInParallel,
}

impl StepError {
    /// Shorthand for a plain execution failure with no structured detail.
    pub fn message(message: impl Into<String>) -> Self {
        StepError::Execution {
            message: message.into(),
            detail: None,
        }
    }

    /// Execution failure carrying a structured error payload.
    pub fn with_detail(message: impl Into<String>, detail: Value) -> Self {
        StepError::Execution {
            message: message.into(),
            detail: Some(detail),
        }
    }
}
