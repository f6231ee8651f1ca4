//! Error types for the workflow engine.
//!
//! - [`StepError`] — Errors raised inside individual step bodies.
//! - [`WorkflowError`] — Top-level errors for workflow construction,
//!   validation, execution, resumption, and scheduling.

pub mod step_error;
pub mod workflow_error;

pub use step_error::StepError;
pub use workflow_error::WorkflowError;

/// Convenience alias for workflow-level results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
/// Convenience alias for step-level results.
pub type StepResult<T> = Result<T, StepError>;
