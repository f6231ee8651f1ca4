//! Conditional branch step: exactly one branch executes.

use std::sync::Arc;

use serde_json::Value;

use super::{BranchRecord, StepContext, StepOutcome, WorkflowStep};
use crate::error::{StepError, StepResult};
use crate::persistence::StepStatus;
use crate::registry::WorkflowRegistry;

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

pub struct WhenStep {
    pub id: String,
    pub name: String,
    pub(crate) predicate: Predicate,
    pub(crate) then_branch: Box<WorkflowStep>,
    pub(crate) else_branch: Option<Box<WorkflowStep>>,
}

impl WhenStep {
    pub(crate) async fn execute(
        &self,
        ctx: StepContext,
        registry: &WorkflowRegistry,
    ) -> StepResult<StepOutcome> {
        let take_then = (self.predicate)(&ctx.data);
        let (taken, skipped) = if take_then {
            (Some(&self.then_branch), self.else_branch.as_ref())
        } else {
            (self.else_branch.as_ref(), Some(&self.then_branch))
        };

        let mut branches = Vec::new();
        if let Some(skipped) = skipped {
            branches.push(BranchRecord {
                step_id: skipped.id().to_string(),
                step_name: skipped.name().to_string(),
                step_type: skipped.kind().as_str(),
                index: if take_then { 1 } else { 0 },
                status: StepStatus::Skipped,
                output: None,
            });
        }

        let Some(taken) = taken else {
            // Condition false with no else branch: data passes through.
            return Ok(StepOutcome::Completed {
                output: ctx.data.clone(),
                branches,
            });
        };

        match taken.execute(ctx.for_branch(ctx.signal.clone()), registry).await? {
            StepOutcome::Completed { output, .. } => {
                branches.push(BranchRecord {
                    step_id: taken.id().to_string(),
                    step_name: taken.name().to_string(),
                    step_type: taken.kind().as_str(),
                    index: if take_then { 0 } else { 1 },
                    status: StepStatus::Completed,
                    output: Some(output.clone()),
                });
                Ok(StepOutcome::Completed { output, branches })
            }
            StepOutcome::Suspended { .. } => Err(StepError::SuspendedInParallel),
        }
    }
}

/// Build a conditional step: `predicate` over the current data selects the
/// branch to execute; the other branch is recorded as skipped. With no else
/// branch and a false predicate, the data passes through unchanged.
pub fn when<P>(
    id: impl Into<String>,
    name: impl Into<String>,
    predicate: P,
    then_branch: WorkflowStep,
    else_branch: Option<WorkflowStep>,
) -> WorkflowStep
where
    P: Fn(&Value) -> bool + Send + Sync + 'static,
{
    WorkflowStep::When(WhenStep {
        id: id.into(),
        name: name.into(),
        predicate: Arc::new(predicate),
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution::ExecutionSnapshot;
    use crate::core::suspend::SuspendController;
    use crate::steps::and_then;
    use serde_json::json;

    fn test_context(data: Value) -> StepContext {
        StepContext {
            data,
            state: ExecutionSnapshot {
                execution_id: "exec-1".into(),
                workflow_id: "wf".into(),
                step_index: 0,
                data: Value::Null,
                user_id: None,
                conversation_id: None,
            },
            suspend: SuspendController::new(),
            signal: tokio_util::sync::CancellationToken::new(),
            resume: None,
        }
    }

    fn pass_fail_step() -> WorkflowStep {
        when(
            "grade",
            "Grade",
            |data: &Value| data["score"].as_i64().unwrap_or(0) >= 60,
            and_then("pass", "Pass", |ctx: StepContext| async move {
                Ok(json!({"verdict": "pass", "score": ctx.data["score"]}))
            }),
            Some(and_then("fail", "Fail", |ctx: StepContext| async move {
                Ok(json!({"verdict": "fail", "score": ctx.data["score"]}))
            })),
        )
    }

    #[tokio::test]
    async fn test_when_takes_then_branch() {
        let registry = WorkflowRegistry::new();
        let outcome = pass_fail_step()
            .execute(test_context(json!({"score": 85})), &registry)
            .await
            .unwrap();
        match outcome {
            StepOutcome::Completed { output, branches } => {
                assert_eq!(output["verdict"], "pass");
                let skipped: Vec<_> = branches
                    .iter()
                    .filter(|b| b.status == StepStatus::Skipped)
                    .collect();
                assert_eq!(skipped.len(), 1);
                assert_eq!(skipped[0].step_id, "fail");
            }
            _ => panic!("Expected completion"),
        }
    }

    #[tokio::test]
    async fn test_when_takes_else_branch() {
        let registry = WorkflowRegistry::new();
        let outcome = pass_fail_step()
            .execute(test_context(json!({"score": 45})), &registry)
            .await
            .unwrap();
        match outcome {
            StepOutcome::Completed { output, branches } => {
                assert_eq!(output["verdict"], "fail");
                assert!(branches
                    .iter()
                    .any(|b| b.step_id == "pass" && b.status == StepStatus::Skipped));
            }
            _ => panic!("Expected completion"),
        }
    }

    #[tokio::test]
    async fn test_when_without_else_passes_data_through() {
        let step = when(
            "maybe",
            "Maybe",
            |_data: &Value| false,
            and_then("never", "Never", |_ctx: StepContext| async move {
                Ok(json!("unreachable"))
            }),
            None,
        );
        let registry = WorkflowRegistry::new();
        let outcome = step
            .execute(test_context(json!({"kept": true})), &registry)
            .await
            .unwrap();
        match outcome {
            StepOutcome::Completed { output, .. } => assert_eq!(output, json!({"kept": true})),
            _ => panic!("Expected completion"),
        }
    }
}
