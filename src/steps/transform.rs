//! Sequential transform step: single input, single output.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::{outcome_from_body, StepContext, StepFn, StepOutcome, WorkflowStep};
use crate::error::StepResult;

pub struct AndThenStep {
    pub id: String,
    pub name: String,
    pub(crate) execute_fn: StepFn,
}

impl AndThenStep {
    pub(crate) async fn execute(&self, ctx: StepContext) -> StepResult<StepOutcome> {
        outcome_from_body((self.execute_fn)(ctx).await)
    }
}

/// Build a sequential transform step from an async body.
///
/// The body receives the current data and execution context and returns the
/// next payload. Returning [`StepError::Suspended`](crate::StepError)
/// suspends the run at this step.
pub fn and_then<F, Fut>(id: impl Into<String>, name: impl Into<String>, execute: F) -> WorkflowStep
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult<Value>> + Send + 'static,
{
    WorkflowStep::AndThen(AndThenStep {
        id: id.into(),
        name: name.into(),
        execute_fn: Arc::new(move |ctx| Box::pin(execute(ctx))),
    })
}
