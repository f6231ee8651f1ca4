//! Execution-scoped state and the public result contract.
//!
//! [`ExecutionState`] is the mutable record the runner threads through one
//! run. [`ExecutionResult`] is what callers get back: a terminal status with
//! exactly one of result/suspension/error populated, plus a `resume`
//! capability bound to the registry lookup for the execution id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::checkpoint::Checkpoint;
use crate::core::suspend::SuspendController;
use crate::error::{WorkflowError, WorkflowResult};
use crate::registry::WorkflowRegistry;

/// Terminal status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Suspended,
    Error,
}

/// How a suspension request takes effect.
///
/// Graceful waits for the in-flight step to finish; immediate propagates the
/// abort signal into the step and races it against a bounded grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuspensionMode {
    #[default]
    Graceful,
    Immediate,
}

/// Options for starting (or resuming) a run.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Execution id override; generated when absent.
    pub execution_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub user_context: HashMap<String, Value>,
    /// Controller for callers that want to suspend the run they start.
    pub suspend_controller: Option<SuspendController>,
    /// Checkpointed position to resume from.
    pub resume_from: Option<ResumeOptions>,
    pub suspension_mode: SuspensionMode,
    /// Grace period an immediate-mode suspension grants the in-flight step
    /// before it is abandoned. Defaults to five seconds.
    pub grace_period: Option<Duration>,
}

/// Checkpointed position a resumed run re-enters at.
#[derive(Debug, Clone)]
pub struct ResumeOptions {
    pub execution_id: String,
    pub checkpoint: Checkpoint,
    pub resume_step_index: usize,
    pub last_event_sequence: Option<u64>,
    /// Data fed to the resumed step, validated against the resume schema.
    pub resume_data: Option<Value>,
}

/// Metadata frozen when a run transitions to `Suspended`.
///
/// Consumed by a subsequent resume, after which it is invalidated; a second
/// resume of the same suspension fails.
#[derive(Debug, Clone)]
pub struct SuspensionMetadata {
    pub suspended_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub suspended_step_index: usize,
    pub last_event_sequence: u64,
    pub suspend_data: Option<Value>,
    pub checkpoint: Checkpoint,
}

/// The mutable record threaded through one run by the runner.
pub struct ExecutionState {
    pub execution_id: String,
    pub workflow_id: String,
    pub step_index: usize,
    pub data: Value,
    pub completed_steps: Vec<Value>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub user_context: HashMap<String, Value>,
    pub suspend_controller: SuspendController,
    pub start_at: DateTime<Utc>,
    event_sequence: Arc<AtomicU64>,
}

impl ExecutionState {
    pub(crate) fn new(
        execution_id: String,
        workflow_id: String,
        input: Value,
        options: &RunOptions,
        suspend_controller: SuspendController,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            step_index: 0,
            data: input,
            completed_steps: Vec::new(),
            user_id: options.user_id.clone(),
            conversation_id: options.conversation_id.clone(),
            user_context: options.user_context.clone(),
            suspend_controller,
            start_at: Utc::now(),
            event_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance and return the next event sequence number.
    pub fn next_event_sequence(&self) -> u64 {
        self.event_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest event sequence issued so far.
    pub fn last_event_sequence(&self) -> u64 {
        self.event_sequence.load(Ordering::SeqCst)
    }

    pub(crate) fn set_event_sequence(&self, value: u64) {
        self.event_sequence.store(value, Ordering::SeqCst);
    }

    /// Owned snapshot handed to lifecycle hooks.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            step_index: self.step_index,
            data: self.data.clone(),
            user_id: self.user_id.clone(),
            conversation_id: self.conversation_id.clone(),
        }
    }
}

/// Owned view of the execution state passed to lifecycle hooks and step
/// bodies.
#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub workflow_id: String,
    pub step_index: usize,
    pub data: Value,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// Options accepted by [`ExecutionResult::resume`].
#[derive(Debug, Clone, Default)]
pub struct ResumeRunOptions {
    /// Resume from the step with this id instead of the checkpointed index.
    pub step_id: Option<String>,
}

/// Result of one workflow execution.
///
/// Exactly one of `result`, `suspension`, `error` is populated, consistent
/// with `status`. The `resume` capability is available regardless of status;
/// resuming a completed execution fails with a not-resumable error.
pub struct ExecutionResult {
    pub execution_id: String,
    pub workflow_id: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub suspension: Option<SuspensionMetadata>,
    pub error: Option<WorkflowError>,
    pub(crate) registry: WorkflowRegistry,
}

impl ExecutionResult {
    /// Resume this execution from its persisted suspension.
    ///
    /// Looks the workflow up in the registry the run was bound to, consumes
    /// the suspension, and re-enters the runner at the checkpointed step.
    pub async fn resume(
        &self,
        input: Option<Value>,
        options: ResumeRunOptions,
    ) -> WorkflowResult<ExecutionResult> {
        let workflow = self
            .registry
            .get_workflow(&self.workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(self.workflow_id.clone()))?;
        workflow.resume(&self.execution_id, input, options).await
    }
}

impl std::fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionResult")
            .field("execution_id", &self.execution_id)
            .field("workflow_id", &self.workflow_id)
            .field("status", &self.status)
            .field("result", &self.result)
            .field("suspension", &self.suspension)
            .field("error", &self.error)
            .finish()
    }
}
