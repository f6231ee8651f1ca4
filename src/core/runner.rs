//! The step-execution state machine.
//!
//! States: `pending -> running -> {completed | suspended | error}`.
//! `suspended` is the only state with an exit edge: a successful resume
//! re-enters `running` at the checkpointed step index.
//!
//! The runner drives the workflow's step list against an
//! [`ExecutionState`], polling the suspend controller at step boundaries
//! (graceful mode) or racing the in-flight step against the abort signal
//! with a bounded grace period (immediate mode). Lifecycle hooks and
//! persistence recording are best-effort: failures are logged and never
//! change the run's outcome.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::core::checkpoint::Checkpoint;
use crate::core::execution::{
    ExecutionResult, ExecutionState, ExecutionStatus, ResumeOptions, RunOptions,
    SuspensionMetadata, SuspensionMode,
};
use crate::core::suspend::SuspendController;
use crate::error::WorkflowError;
use crate::persistence::{
    HistoryStatus, StepHistoryEntry, StepStatus, StepUpdate, TimelineEvent, WorkflowHistoryEntry,
};
use crate::registry::ExecutionPhase;
use crate::steps::{BranchRecord, ResumeContext, StepContext, StepOutcome};
use crate::workflow::{HookFn, Workflow};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub(crate) struct Runner<'w> {
    workflow: &'w Workflow,
}

impl<'w> Runner<'w> {
    pub fn new(workflow: &'w Workflow) -> Self {
        Self { workflow }
    }

    pub async fn run(&self, input: Value, options: RunOptions) -> ExecutionResult {
        let start_at = Utc::now();
        let controller = options
            .suspend_controller
            .clone()
            .unwrap_or_else(SuspendController::new);
        let resume_from = options.resume_from.clone();
        let execution_id = options
            .execution_id
            .clone()
            .or_else(|| resume_from.as_ref().map(|r| r.execution_id.clone()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Resolve the starting payload, index, and resume context.
        let start = match &resume_from {
            Some(resume) => self.prepare_resume(resume, &input),
            None => self.prepare_fresh(&input),
        };
        let (initial_data, start_index, resume_ctx, completed_steps) = match start {
            Ok(parts) => parts,
            Err(error) => {
                // Validation and stale-resume failures terminate before any
                // partial execution.
                return self.terminal_error(execution_id, start_at, error);
            }
        };

        let mut state = ExecutionState::new(
            execution_id.clone(),
            self.workflow.id.clone(),
            initial_data,
            &options,
            controller.clone(),
        );
        state.step_index = start_index;
        state.completed_steps = completed_steps;
        if let Some(resume) = &resume_from {
            state.set_event_sequence(resume.last_event_sequence.unwrap_or(0));
        }

        self.workflow
            .registry
            .begin_execution(&execution_id, &self.workflow.id);
        if resume_from.is_none() {
            self.persist_create(&state, &input).await;
        } else {
            self.persist_execution_status(&state, HistoryStatus::Running, None)
                .await;
        }
        self.record_event(&state, "workflow-start", "running").await;
        self.fire_hook(&self.workflow.hooks.on_start, "on_start", &state)
            .await;

        let grace_period = options.grace_period.unwrap_or(DEFAULT_GRACE_PERIOD);
        let mut resume_ctx = resume_ctx;
        let total = self.workflow.steps.len();

        while state.step_index < total {
            let index = state.step_index;

            // Graceful suspension takes effect at the step boundary.
            if controller.is_suspended() {
                return self
                    .suspend(state, start_at, index, controller.reason(), None)
                    .await;
            }

            let step = &self.workflow.steps[index];
            self.persist_step_running(&state, index).await;
            self.record_event(&state, "step-start", "running").await;
            self.fire_hook(&self.workflow.hooks.on_step_start, "on_step_start", &state)
                .await;

            let ctx = StepContext {
                data: state.data.clone(),
                state: state.snapshot(),
                suspend: controller.clone(),
                signal: controller.signal(),
                resume: resume_ctx.take(),
            };

            let outcome = {
                let mut step_future = step.execute(ctx, &self.workflow.registry);
                match options.suspension_mode {
                    SuspensionMode::Graceful => (&mut step_future).await,
                    SuspensionMode::Immediate => {
                        tokio::select! {
                            outcome = &mut step_future => outcome,
                            _ = controller.cancelled() => {
                                // Grant the interrupted step a bounded grace
                                // period to observe the signal, then abandon it.
                                match tokio::time::timeout(grace_period, &mut step_future).await {
                                    Ok(outcome) => outcome,
                                    Err(_) => Ok(StepOutcome::Suspended {
                                        reason: controller.reason(),
                                        step_state: None,
                                    }),
                                }
                            }
                        }
                    }
                }
            };

            match outcome {
                Ok(StepOutcome::Completed { output, branches }) => {
                    self.persist_branches(&state, index, &branches).await;
                    self.persist_step_update(
                        &state,
                        index,
                        StepUpdate {
                            status: Some(StepStatus::Completed),
                            output: Some(output.clone()),
                            error_message: None,
                        },
                    )
                    .await;
                    self.record_event(&state, "step-end", "completed").await;
                    self.fire_hook(&self.workflow.hooks.on_step_end, "on_step_end", &state)
                        .await;

                    state.completed_steps.push(output.clone());
                    state.data = output;
                    state.step_index = index + 1;
                }
                Ok(StepOutcome::Suspended { reason, step_state }) => {
                    let reason = reason.or_else(|| controller.reason());
                    return self.suspend(state, start_at, index, reason, step_state).await;
                }
                Err(step_error) => {
                    let (message, detail) = match &step_error {
                        crate::error::StepError::Execution { message, detail } => {
                            (message.clone(), detail.clone())
                        }
                        other => (other.to_string(), None),
                    };
                    self.persist_step_update(
                        &state,
                        index,
                        StepUpdate {
                            status: Some(StepStatus::Error),
                            output: None,
                            error_message: Some(message.clone()),
                        },
                    )
                    .await;
                    self.record_event(&state, "step-error", "error").await;

                    let error = WorkflowError::StepExecution {
                        step_id: step.id().to_string(),
                        step_index: index,
                        message,
                        detail,
                    };
                    return self.finish_error(state, start_at, error).await;
                }
            }
        }

        // All steps done: check the final payload against the result schema.
        let final_data = match &self.workflow.result_schema {
            Some(schema) => match schema.validate(&state.data) {
                Ok(value) => value,
                Err(e) => {
                    return self.finish_error(state, start_at, WorkflowError::Validation(e)).await;
                }
            },
            None => state.data.clone(),
        };

        self.workflow.registry.finish_execution(
            &state.execution_id,
            ExecutionPhase::Completed,
            state.last_event_sequence(),
        );
        self.persist_execution_status(&state, HistoryStatus::Completed, Some(final_data.clone()))
            .await;
        self.record_event(&state, "workflow-end", "completed").await;
        self.fire_hook(&self.workflow.hooks.on_end, "on_end", &state)
            .await;

        ExecutionResult {
            execution_id: state.execution_id,
            workflow_id: self.workflow.id.clone(),
            start_at,
            end_at: Utc::now(),
            status: ExecutionStatus::Completed,
            result: Some(final_data),
            suspension: None,
            error: None,
            registry: self.workflow.registry.clone(),
        }
    }

    /// Validate input for a fresh run.
    #[allow(clippy::type_complexity)]
    fn prepare_fresh(
        &self,
        input: &Value,
    ) -> Result<(Value, usize, Option<ResumeContext>, Vec<Value>), WorkflowError> {
        let data = match &self.workflow.input_schema {
            Some(schema) => schema.validate(input)?,
            None => input.clone(),
        };
        Ok((data, 0, None, Vec::new()))
    }

    /// Rehydrate state from a checkpoint, enforcing the stale-resume guard
    /// and the resume schema.
    #[allow(clippy::type_complexity)]
    fn prepare_resume(
        &self,
        resume: &ResumeOptions,
        input: &Value,
    ) -> Result<(Value, usize, Option<ResumeContext>, Vec<Value>), WorkflowError> {
        if let (Some(requested), Some(persisted)) = (
            resume.last_event_sequence,
            self.workflow
                .registry
                .last_event_sequence(&resume.execution_id),
        ) {
            if requested < persisted {
                return Err(WorkflowError::StaleResume {
                    execution_id: resume.execution_id.clone(),
                    requested,
                    persisted,
                });
            }
        }

        if resume.resume_step_index >= self.workflow.steps.len() {
            return Err(WorkflowError::Checkpoint(format!(
                "resume step index {} out of bounds for {} steps",
                resume.resume_step_index,
                self.workflow.steps.len()
            )));
        }

        let resume_data = match (&resume.resume_data, &self.workflow.resume_schema) {
            (Some(data), Some(schema)) => Some(schema.validate(data)?),
            (data, _) => data.clone(),
        };

        let base = resume
            .checkpoint
            .last_data()
            .cloned()
            .unwrap_or_else(|| input.clone());
        let merged = merge_resume_data(base, resume_data.clone());

        let resume_ctx = ResumeContext {
            step_execution_state: resume.checkpoint.step_execution_state.clone(),
            resume_data,
        };
        Ok((
            merged,
            resume.resume_step_index,
            Some(resume_ctx),
            resume.checkpoint.completed_steps_data.clone(),
        ))
    }

    /// Freeze the run into a checkpoint and return a suspended result.
    async fn suspend(
        &self,
        state: ExecutionState,
        start_at: chrono::DateTime<Utc>,
        step_index: usize,
        reason: Option<String>,
        step_state: Option<Value>,
    ) -> ExecutionResult {
        let checkpoint = Checkpoint::new(step_index, state.completed_steps.clone())
            .with_step_state(step_state);

        let suspend_data = match (state.suspend_controller.take_payload(), &self.workflow.suspend_schema) {
            (Some(payload), Some(schema)) => match schema.validate(&payload) {
                Ok(validated) => Some(validated),
                Err(e) => {
                    warn!(error = %e, "suspend payload failed validation; dropping it");
                    None
                }
            },
            (payload, _) => payload,
        };

        let metadata = SuspensionMetadata {
            suspended_at: Utc::now(),
            reason,
            suspended_step_index: step_index,
            last_event_sequence: state.last_event_sequence(),
            suspend_data,
            checkpoint: checkpoint.clone(),
        };

        // The suspended result promises this checkpoint exists; an in-memory
        // copy is always kept in the registry, durable storage is best-effort.
        if let Some(persistence) = &self.workflow.persistence {
            if let Err(e) = persistence
                .save_checkpoint(&state.execution_id, &checkpoint)
                .await
            {
                warn!(execution_id = %state.execution_id, error = %e, "failed to persist checkpoint");
            }
        }

        self.workflow
            .registry
            .suspend_execution(&state.execution_id, metadata.clone());
        self.persist_execution_status(&state, HistoryStatus::Suspended, None)
            .await;
        self.record_event(&state, "workflow-suspended", "suspended")
            .await;
        self.fire_hook(&self.workflow.hooks.on_end, "on_end", &state)
            .await;

        ExecutionResult {
            execution_id: state.execution_id,
            workflow_id: self.workflow.id.clone(),
            start_at,
            end_at: Utc::now(),
            status: ExecutionStatus::Suspended,
            result: None,
            suspension: Some(metadata),
            error: None,
            registry: self.workflow.registry.clone(),
        }
    }

    /// Terminal error after execution began: record, hook, and build the
    /// result. Partial step outputs are not part of the public contract.
    async fn finish_error(
        &self,
        state: ExecutionState,
        start_at: chrono::DateTime<Utc>,
        error: WorkflowError,
    ) -> ExecutionResult {
        self.workflow.registry.finish_execution(
            &state.execution_id,
            ExecutionPhase::Error,
            state.last_event_sequence(),
        );
        self.persist_execution_status(&state, HistoryStatus::Error, None)
            .await;
        self.record_event(&state, "workflow-end", "error").await;
        self.fire_hook(&self.workflow.hooks.on_end, "on_end", &state)
            .await;

        ExecutionResult {
            execution_id: state.execution_id,
            workflow_id: self.workflow.id.clone(),
            start_at,
            end_at: Utc::now(),
            status: ExecutionStatus::Error,
            result: None,
            suspension: None,
            error: Some(error),
            registry: self.workflow.registry.clone(),
        }
    }

    /// Terminal error before any execution state exists (input validation,
    /// stale resume): no hooks, no persistence.
    fn terminal_error(
        &self,
        execution_id: String,
        start_at: chrono::DateTime<Utc>,
        error: WorkflowError,
    ) -> ExecutionResult {
        ExecutionResult {
            execution_id,
            workflow_id: self.workflow.id.clone(),
            start_at,
            end_at: Utc::now(),
            status: ExecutionStatus::Error,
            result: None,
            suspension: None,
            error: Some(error),
            registry: self.workflow.registry.clone(),
        }
    }

    async fn fire_hook(&self, hook: &Option<HookFn>, name: &str, state: &ExecutionState) {
        if let Some(hook) = hook {
            if let Err(e) = hook(state.snapshot()).await {
                warn!(hook = name, error = %e, "lifecycle hook failed");
            }
        }
    }

    async fn persist_create(&self, state: &ExecutionState, input: &Value) {
        let Some(persistence) = &self.workflow.persistence else {
            return;
        };
        let entry = WorkflowHistoryEntry {
            id: state.execution_id.clone(),
            workflow_id: self.workflow.id.clone(),
            workflow_name: self.workflow.name.clone(),
            status: HistoryStatus::Running,
            start_time: state.start_at,
            end_time: None,
            input: input.clone(),
            output: None,
            user_id: state.user_id.clone(),
            conversation_id: state.conversation_id.clone(),
            metadata: state.user_context.clone(),
        };
        if let Err(e) = persistence.create_execution(entry).await {
            warn!(execution_id = %state.execution_id, error = %e, "failed to record execution start");
        }
    }

    async fn persist_execution_status(
        &self,
        state: &ExecutionState,
        status: HistoryStatus,
        output: Option<Value>,
    ) {
        let Some(persistence) = &self.workflow.persistence else {
            return;
        };
        if let Err(e) = persistence
            .update_execution(&state.execution_id, status, output)
            .await
        {
            warn!(execution_id = %state.execution_id, error = %e, "failed to update execution record");
        }
    }

    async fn persist_step_running(&self, state: &ExecutionState, index: usize) {
        let Some(persistence) = &self.workflow.persistence else {
            return;
        };
        let step = &self.workflow.steps[index];
        let entry = StepHistoryEntry {
            execution_id: state.execution_id.clone(),
            step_index: index,
            step_id: step.id().to_string(),
            step_name: step.name().to_string(),
            step_type: step.kind().as_str().to_string(),
            status: StepStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            input: Some(state.data.clone()),
            output: None,
            error_message: None,
            parallel_index: None,
        };
        if let Err(e) = persistence.record_step(entry).await {
            warn!(execution_id = %state.execution_id, step_index = index, error = %e, "failed to record step start");
        }
    }

    async fn persist_step_update(&self, state: &ExecutionState, index: usize, update: StepUpdate) {
        let Some(persistence) = &self.workflow.persistence else {
            return;
        };
        if let Err(e) = persistence
            .update_step(&state.execution_id, index, update)
            .await
        {
            warn!(execution_id = %state.execution_id, step_index = index, error = %e, "failed to update step record");
        }
    }

    /// Record branch entries produced by composite steps (taken, skipped,
    /// parallel outputs), keyed under the parent step index.
    async fn persist_branches(
        &self,
        state: &ExecutionState,
        index: usize,
        branches: &[BranchRecord],
    ) {
        let Some(persistence) = &self.workflow.persistence else {
            return;
        };
        for branch in branches {
            let entry = StepHistoryEntry {
                execution_id: state.execution_id.clone(),
                step_index: index,
                step_id: branch.step_id.clone(),
                step_name: branch.step_name.clone(),
                step_type: branch.step_type.to_string(),
                status: branch.status,
                start_time: Utc::now(),
                end_time: Some(Utc::now()),
                input: None,
                output: branch.output.clone(),
                error_message: None,
                parallel_index: Some(branch.index),
            };
            if let Err(e) = persistence.record_step(entry).await {
                warn!(execution_id = %state.execution_id, step_index = index, error = %e, "failed to record branch entry");
            }
        }
    }

    async fn record_event(&self, state: &ExecutionState, name: &str, status: &str) {
        let sequence = state.next_event_sequence();
        let Some(persistence) = &self.workflow.persistence else {
            return;
        };
        let event = TimelineEvent {
            execution_id: state.execution_id.clone(),
            event_sequence: sequence,
            name: name.to_string(),
            status: status.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = persistence.record_timeline_event(event).await {
            warn!(execution_id = %state.execution_id, error = %e, "failed to record timeline event");
        }
    }
}

/// Merge the resume payload over the last known data. Two JSON objects merge
/// key-by-key (resume wins); any other combination replaces the payload.
fn merge_resume_data(base: Value, resume_data: Option<Value>) -> Value {
    match resume_data {
        None => base,
        Some(Value::Object(resume_map)) => match base {
            Value::Object(mut base_map) => {
                for (key, value) in resume_map {
                    base_map.insert(key, value);
                }
                Value::Object(base_map)
            }
            _ => Value::Object(resume_map),
        },
        Some(other) => other,
    }
}
