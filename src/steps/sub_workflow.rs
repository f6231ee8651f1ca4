//! Sub-workflow step: delegates to another registered workflow.
//!
//! Suspension propagates transparently: when the child run suspends, this
//! step reports a suspension whose opaque state nests the child execution id
//! and encoded checkpoint, and a later resume of the parent re-enters the
//! child from that checkpoint.

use serde_json::{json, Value};

use super::{StepContext, StepOutcome};
use crate::core::checkpoint::{decode_checkpoint, encode_checkpoint};
use crate::core::execution::{ExecutionStatus, ResumeOptions, ResumeRunOptions, RunOptions};
use crate::error::{StepError, StepResult, WorkflowError};
use crate::registry::WorkflowRegistry;

pub struct SubWorkflowStep {
    pub id: String,
    pub name: String,
    pub(crate) workflow_id: String,
}

impl SubWorkflowStep {
    pub(crate) async fn execute(
        &self,
        ctx: StepContext,
        registry: &WorkflowRegistry,
    ) -> StepResult<StepOutcome> {
        let workflow = registry
            .get_workflow(&self.workflow_id)
            .ok_or_else(|| StepError::SubWorkflowNotFound(self.workflow_id.clone()))?;

        let nested_state = ctx
            .resume
            .as_ref()
            .and_then(|resume| resume.step_execution_state.clone());
        let resume_data = ctx.resume.as_ref().and_then(|r| r.resume_data.clone());

        let result = match &nested_state {
            Some(state) => {
                let execution_id = state
                    .get("execution_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StepError::message("malformed sub-workflow resume state"))?
                    .to_string();

                match workflow
                    .resume(&execution_id, resume_data.clone(), ResumeRunOptions::default())
                    .await
                {
                    Ok(result) => result,
                    Err(WorkflowError::NotResumable(_)) => {
                        // The child's suspension is gone (e.g. registry entry
                        // dropped); fall back to the checkpoint nested in the
                        // parent's step state.
                        let encoded = state.get("checkpoint").ok_or_else(|| {
                            StepError::message(format!(
                                "sub-workflow '{}' has no nested checkpoint",
                                self.workflow_id
                            ))
                        })?;
                        let checkpoint = decode_checkpoint(encoded, workflow.steps.len())
                            .map_err(|e| StepError::message(e.to_string()))?;
                        let resume_from = ResumeOptions {
                            execution_id,
                            resume_step_index: checkpoint.step_index,
                            checkpoint,
                            last_event_sequence: None,
                            resume_data: resume_data.clone(),
                        };
                        workflow
                            .run(
                                Value::Null,
                                RunOptions {
                                    resume_from: Some(resume_from),
                                    ..Default::default()
                                },
                            )
                            .await
                    }
                    Err(e) => {
                        return Err(StepError::message(format!(
                            "sub-workflow '{}' resume failed: {e}",
                            self.workflow_id
                        )));
                    }
                }
            }
            None => {
                let options = RunOptions {
                    user_id: ctx.state.user_id.clone(),
                    conversation_id: ctx.state.conversation_id.clone(),
                    // Share the parent controller so a parent-level suspend
                    // request reaches the child run.
                    suspend_controller: Some(ctx.suspend.clone()),
                    ..Default::default()
                };
                workflow.run(ctx.data.clone(), options).await
            }
        };

        match result.status {
            ExecutionStatus::Completed => Ok(StepOutcome::Completed {
                output: result.result.unwrap_or(Value::Null),
                branches: Vec::new(),
            }),
            ExecutionStatus::Suspended => {
                let suspension = result.suspension.as_ref();
                Ok(StepOutcome::Suspended {
                    reason: suspension.and_then(|s| s.reason.clone()),
                    step_state: Some(json!({
                        "execution_id": result.execution_id,
                        "workflow_id": self.workflow_id,
                        "checkpoint": suspension
                            .map(|s| encode_checkpoint(&s.checkpoint))
                            .unwrap_or(Value::Null),
                    })),
                })
            }
            ExecutionStatus::Error => {
                let message = result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".into());
                Err(StepError::message(format!(
                    "sub-workflow '{}' failed: {message}",
                    self.workflow_id
                )))
            }
        }
    }
}

/// Build a step that runs another registered workflow as a single unit.
pub fn sub_workflow(
    id: impl Into<String>,
    name: impl Into<String>,
    workflow_id: impl Into<String>,
) -> super::WorkflowStep {
    super::WorkflowStep::SubWorkflow(SubWorkflowStep {
        id: id.into(),
        name: name.into(),
        workflow_id: workflow_id.into(),
    })
}
