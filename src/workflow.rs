//! Workflow definition, builder, and the caller-facing run surface.
//!
//! A [`Workflow`] is immutable once built: id, name, purpose, schemas,
//! ordered steps, optional persistence, and lifecycle hooks. Build one with
//! [`Workflow::builder`], register it into a [`WorkflowRegistry`], then
//! drive it with [`run`](Workflow::run), [`scheduled_run`](Workflow::scheduled_run),
//! or [`resume`](Workflow::resume).

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::core::execution::{
    ExecutionResult, ExecutionSnapshot, ResumeOptions, ResumeRunOptions, RunOptions,
};
use crate::core::runner::Runner;
use crate::core::suspend::SuspendController;
use crate::error::{WorkflowError, WorkflowResult};
use crate::persistence::Persistence;
use crate::registry::WorkflowRegistry;
use crate::scheduler::{
    create_scheduler, CreateSchedulerParams, ScheduleCallback, ScheduleHandle, ScheduleResultHook,
    SchedulerOptions,
};
use crate::steps::WorkflowStep;
use crate::validation::SharedValidator;

/// Asynchronous lifecycle hook. Failures are logged, never fatal.
pub type HookFn =
    Arc<dyn Fn(ExecutionSnapshot) -> BoxFuture<'static, Result<(), WorkflowError>> + Send + Sync>;

/// Lifecycle hooks invoked around a run and each step.
#[derive(Clone, Default)]
pub struct WorkflowHooks {
    pub on_start: Option<HookFn>,
    pub on_step_start: Option<HookFn>,
    pub on_step_end: Option<HookFn>,
    pub on_end: Option<HookFn>,
}

/// Cron schedule attached to a [`Workflow::scheduled_run`] call.
#[derive(Clone, Default)]
pub struct WorkflowScheduleOptions {
    /// Six-field cron expression (second minute hour day month weekday).
    pub expression: String,
    /// Invoked with each fire's execution result.
    pub on_result: Option<ScheduleResultHook>,
    pub options: SchedulerOptions,
}

/// Options accepted by [`Workflow::scheduled_run`].
#[derive(Clone, Default)]
pub struct ScheduledRunOptions {
    pub schedule: Option<WorkflowScheduleOptions>,
    pub run: RunOptions,
}

/// An executable workflow definition.
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub purpose: String,
    pub(crate) input_schema: Option<SharedValidator>,
    pub(crate) result_schema: Option<SharedValidator>,
    pub(crate) suspend_schema: Option<SharedValidator>,
    pub(crate) resume_schema: Option<SharedValidator>,
    pub(crate) steps: Vec<WorkflowStep>,
    pub(crate) hooks: WorkflowHooks,
    pub(crate) persistence: Option<Arc<dyn Persistence>>,
    pub(crate) registry: WorkflowRegistry,
}

impl Workflow {
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            id: id.into(),
            name: name.into(),
            purpose: None,
            input_schema: None,
            result_schema: None,
            suspend_schema: None,
            resume_schema: None,
            steps: Vec::new(),
            hooks: WorkflowHooks::default(),
            persistence: None,
            registry: None,
        }
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Execute the workflow against a validated input.
    ///
    /// Never rejects: validation, step, and configuration failures surface
    /// as a terminal result with `Error` status.
    pub async fn run(&self, input: Value, options: RunOptions) -> ExecutionResult {
        Runner::new(self).run(input, options).await
    }

    /// Run the workflow on a cron schedule.
    ///
    /// Fails with a configuration error (message exactly
    /// `"Schedule expression is required"`) before any trigger is registered
    /// when the schedule or its expression is absent or empty. On success
    /// the underlying trigger is started and its handle returned.
    pub async fn scheduled_run(
        self: Arc<Self>,
        input: Value,
        options: ScheduledRunOptions,
    ) -> WorkflowResult<ScheduleHandle> {
        let schedule = match options.schedule {
            Some(schedule) if !schedule.expression.is_empty() => schedule,
            _ => {
                return Err(WorkflowError::Configuration(
                    "Schedule expression is required".into(),
                ));
            }
        };

        let workflow = Arc::clone(&self);
        let run_options = options.run;
        let callback: ScheduleCallback = Arc::new(move || {
            let workflow = Arc::clone(&workflow);
            let input = input.clone();
            let mut run_options = run_options.clone();
            // Every fire is a fresh execution.
            run_options.execution_id = None;
            run_options.resume_from = None;
            Box::pin(async move { workflow.run(input, run_options).await })
        });

        let handle = create_scheduler(CreateSchedulerParams {
            expression: schedule.expression,
            callback,
            on_result: schedule.on_result,
            options: schedule.options,
        })?;
        handle.start();
        Ok(handle)
    }

    /// Resume a suspended execution of this workflow.
    ///
    /// Consumes the suspension tracked in the registry (falling back to the
    /// persisted checkpoint when the registry no longer has it) and
    /// re-enters the runner at the checkpointed step index. Unknown or
    /// already-terminal executions fail with a not-resumable error.
    pub async fn resume(
        &self,
        execution_id: &str,
        input: Option<Value>,
        options: ResumeRunOptions,
    ) -> WorkflowResult<ExecutionResult> {
        let resume_from = match self.registry.take_suspension(execution_id) {
            Some(suspension) => {
                let resume_step_index = match &options.step_id {
                    Some(step_id) => self.resolve_resume_index(
                        step_id,
                        suspension.suspended_step_index,
                    )?,
                    None => suspension.suspended_step_index,
                };
                let mut checkpoint = suspension.checkpoint;
                checkpoint
                    .completed_steps_data
                    .truncate(resume_step_index);
                checkpoint.step_index = resume_step_index;
                ResumeOptions {
                    execution_id: execution_id.to_string(),
                    checkpoint,
                    resume_step_index,
                    last_event_sequence: Some(suspension.last_event_sequence),
                    resume_data: input,
                }
            }
            None => {
                if self.registry.execution_phase(execution_id).is_some() {
                    // Known execution without a pending suspension: running,
                    // completed, errored, or already consumed.
                    return Err(WorkflowError::NotResumable(execution_id.to_string()));
                }
                let checkpoint = match &self.persistence {
                    Some(persistence) => persistence
                        .load_checkpoint(execution_id)
                        .await
                        .map_err(|e| WorkflowError::Checkpoint(e.to_string()))?,
                    None => None,
                };
                let Some(checkpoint) = checkpoint else {
                    return Err(WorkflowError::NotResumable(execution_id.to_string()));
                };
                if checkpoint.step_index >= self.steps.len() {
                    return Err(WorkflowError::Checkpoint(format!(
                        "persisted step index {} out of bounds for {} steps",
                        checkpoint.step_index,
                        self.steps.len()
                    )));
                }
                ResumeOptions {
                    execution_id: execution_id.to_string(),
                    resume_step_index: checkpoint.step_index,
                    checkpoint,
                    last_event_sequence: None,
                    resume_data: input,
                }
            }
        };

        let run_options = RunOptions {
            execution_id: Some(execution_id.to_string()),
            resume_from: Some(resume_from),
            ..Default::default()
        };
        Ok(self.run(Value::Null, run_options).await)
    }

    /// Factory for callers that want to suspend a run they are about to
    /// start.
    pub fn create_suspend_controller(&self) -> SuspendController {
        SuspendController::new()
    }

    fn resolve_resume_index(
        &self,
        step_id: &str,
        suspended_index: usize,
    ) -> WorkflowResult<usize> {
        let index = self
            .steps
            .iter()
            .position(|step| step.id() == step_id)
            .ok_or_else(|| {
                WorkflowError::Configuration(format!("unknown resume step id: {step_id}"))
            })?;
        if index > suspended_index {
            return Err(WorkflowError::Configuration(format!(
                "cannot resume at step '{step_id}': it is past the suspended step"
            )));
        }
        Ok(index)
    }
}

/// Builder for [`Workflow`]. Steps execute in the order they are added.
pub struct WorkflowBuilder {
    id: String,
    name: String,
    purpose: Option<String>,
    input_schema: Option<SharedValidator>,
    result_schema: Option<SharedValidator>,
    suspend_schema: Option<SharedValidator>,
    resume_schema: Option<SharedValidator>,
    steps: Vec<WorkflowStep>,
    hooks: WorkflowHooks,
    persistence: Option<Arc<dyn Persistence>>,
    registry: Option<WorkflowRegistry>,
}

impl WorkflowBuilder {
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn input_schema(mut self, schema: SharedValidator) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn result_schema(mut self, schema: SharedValidator) -> Self {
        self.result_schema = Some(schema);
        self
    }

    pub fn suspend_schema(mut self, schema: SharedValidator) -> Self {
        self.suspend_schema = Some(schema);
        self
    }

    pub fn resume_schema(mut self, schema: SharedValidator) -> Self {
        self.resume_schema = Some(schema);
        self
    }

    /// Append a step. See the [`steps`](crate::steps) constructors.
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn hooks(mut self, hooks: WorkflowHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Bind to an explicit registry instead of the process-wide default.
    pub fn registry(mut self, registry: WorkflowRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validate construction invariants and build the workflow.
    pub fn build(self) -> WorkflowResult<Arc<Workflow>> {
        for step in &self.steps {
            step.validate().map_err(WorkflowError::Configuration)?;
        }
        Ok(Arc::new(Workflow {
            id: self.id,
            name: self.name,
            purpose: self.purpose.unwrap_or_else(|| "No purpose provided".into()),
            input_schema: self.input_schema,
            result_schema: self.result_schema,
            suspend_schema: self.suspend_schema,
            resume_schema: self.resume_schema,
            steps: self.steps,
            hooks: self.hooks,
            persistence: self.persistence,
            registry: self.registry.unwrap_or_else(WorkflowRegistry::global),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{and_then, parallel_race};
    use serde_json::json;

    #[tokio::test]
    async fn test_builder_defaults() {
        let workflow = Workflow::builder("wf", "My workflow")
            .step(and_then("noop", "Noop", |ctx: crate::steps::StepContext| async move { Ok(ctx.data) }))
            .build()
            .unwrap();
        assert_eq!(workflow.id, "wf");
        assert_eq!(workflow.purpose, "No purpose provided");
        assert_eq!(workflow.step_count(), 1);
    }

    #[test]
    fn test_builder_rejects_zero_branch_race() {
        let err = Workflow::builder("wf", "Race")
            .step(parallel_race("race", "Race", Vec::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, WorkflowError::Configuration(_)));
        assert!(err.to_string().contains("at least one branch"));
    }

    #[tokio::test]
    async fn test_resume_unknown_execution_not_resumable() {
        let registry = WorkflowRegistry::new();
        let workflow = Workflow::builder("wf", "My workflow")
            .registry(registry)
            .step(and_then("noop", "Noop", |ctx: crate::steps::StepContext| async move { Ok(ctx.data) }))
            .build()
            .unwrap();

        let err = workflow
            .resume("nope", Some(json!({})), ResumeRunOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WorkflowError::NotResumable(_)));
    }
}
