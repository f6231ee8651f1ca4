//! The step model: a closed union of executable step variants.
//!
//! Each variant is a pure contract over `(data, context) -> output`,
//! asynchronous, able to observe the abort signal, and able to fail. The
//! runner dispatches on the tag, never on structural shape:
//!
//! - [`and_then`] — sequential transform, the common case.
//! - [`when`] — conditional branch; exactly one branch executes, the
//!   untaken branch is recorded as skipped.
//! - [`parallel_all`] — concurrent fan-out, outputs in branch order.
//! - [`parallel_race`] — concurrent fan-out, first settled branch wins.
//! - [`sub_workflow`] — delegates to another registered workflow,
//!   nesting its checkpoint on suspension.

mod conditional;
mod parallel;
mod sub_workflow;
mod transform;

pub use conditional::when;
pub use parallel::{parallel_all, parallel_race};
pub use sub_workflow::sub_workflow;
pub use transform::and_then;

pub use conditional::WhenStep;
pub use parallel::{ParallelAllStep, ParallelRaceStep};
pub use sub_workflow::SubWorkflowStep;
pub use transform::AndThenStep;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::execution::ExecutionSnapshot;
use crate::core::suspend::SuspendController;
use crate::error::{StepError, StepResult};
use crate::persistence::StepStatus;
use crate::registry::WorkflowRegistry;

/// Boxed asynchronous step body.
pub type StepFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, StepResult<Value>> + Send + Sync>;

/// Context handed to a step body: the current data, a snapshot of the
/// execution state, the run-level suspend controller, and the abort signal
/// for this step (a child token inside race branches).
#[derive(Clone)]
pub struct StepContext {
    pub data: Value,
    pub state: ExecutionSnapshot,
    pub suspend: SuspendController,
    pub signal: CancellationToken,
    /// Set only on the step a resumed run re-enters at.
    pub resume: Option<ResumeContext>,
}

impl StepContext {
    pub(crate) fn for_branch(&self, signal: CancellationToken) -> StepContext {
        StepContext {
            data: self.data.clone(),
            state: self.state.clone(),
            suspend: self.suspend.clone(),
            signal,
            resume: None,
        }
    }
}

/// Resume-time context for the step that was suspended.
#[derive(Debug, Clone)]
pub struct ResumeContext {
    /// Opaque partial state captured when the step suspended.
    pub step_execution_state: Option<Value>,
    /// Validated resume payload supplied by the caller.
    pub resume_data: Option<Value>,
}

/// Discriminant of a step variant, as recorded in step history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Func,
    Conditional,
    ParallelAll,
    ParallelRace,
    SubWorkflow,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Func => "func",
            StepKind::Conditional => "conditional-when",
            StepKind::ParallelAll => "parallel-all",
            StepKind::ParallelRace => "parallel-race",
            StepKind::SubWorkflow => "sub-workflow",
        }
    }
}

/// Branch-level record produced by composite steps, persisted by the runner
/// alongside the parent step entry.
#[derive(Debug, Clone)]
pub(crate) struct BranchRecord {
    pub step_id: String,
    pub step_name: String,
    pub step_type: &'static str,
    pub index: usize,
    pub status: StepStatus,
    pub output: Option<Value>,
}

/// Outcome of dispatching one step.
#[derive(Debug)]
pub(crate) enum StepOutcome {
    Completed {
        output: Value,
        branches: Vec<BranchRecord>,
    },
    Suspended {
        reason: Option<String>,
        step_state: Option<Value>,
    },
}

/// One unit of workflow logic. Closed union; the runner dispatches on the
/// tag.
pub enum WorkflowStep {
    AndThen(AndThenStep),
    When(WhenStep),
    ParallelAll(ParallelAllStep),
    ParallelRace(ParallelRaceStep),
    SubWorkflow(SubWorkflowStep),
}

impl WorkflowStep {
    pub fn id(&self) -> &str {
        match self {
            WorkflowStep::AndThen(s) => &s.id,
            WorkflowStep::When(s) => &s.id,
            WorkflowStep::ParallelAll(s) => &s.id,
            WorkflowStep::ParallelRace(s) => &s.id,
            WorkflowStep::SubWorkflow(s) => &s.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            WorkflowStep::AndThen(s) => &s.name,
            WorkflowStep::When(s) => &s.name,
            WorkflowStep::ParallelAll(s) => &s.name,
            WorkflowStep::ParallelRace(s) => &s.name,
            WorkflowStep::SubWorkflow(s) => &s.name,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            WorkflowStep::AndThen(_) => StepKind::Func,
            WorkflowStep::When(_) => StepKind::Conditional,
            WorkflowStep::ParallelAll(_) => StepKind::ParallelAll,
            WorkflowStep::ParallelRace(_) => StepKind::ParallelRace,
            WorkflowStep::SubWorkflow(_) => StepKind::SubWorkflow,
        }
    }

    /// Validate construction-time invariants, recursively over branches.
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            WorkflowStep::AndThen(_) | WorkflowStep::SubWorkflow(_) => Ok(()),
            WorkflowStep::When(s) => {
                s.then_branch.validate()?;
                if let Some(otherwise) = &s.else_branch {
                    otherwise.validate()?;
                }
                Ok(())
            }
            WorkflowStep::ParallelAll(s) => {
                for branch in &s.branches {
                    branch.validate()?;
                }
                Ok(())
            }
            WorkflowStep::ParallelRace(s) => {
                if s.branches.is_empty() {
                    return Err(format!(
                        "parallel-race step '{}' requires at least one branch",
                        s.id
                    ));
                }
                for branch in &s.branches {
                    branch.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Execute this step. Boxed because composite variants recurse.
    pub(crate) fn execute<'a>(
        &'a self,
        ctx: StepContext,
        registry: &'a WorkflowRegistry,
    ) -> BoxFuture<'a, StepResult<StepOutcome>> {
        Box::pin(async move {
            match self {
                WorkflowStep::AndThen(s) => s.execute(ctx).await,
                WorkflowStep::When(s) => s.execute(ctx, registry).await,
                WorkflowStep::ParallelAll(s) => s.execute(ctx, registry).await,
                WorkflowStep::ParallelRace(s) => s.execute(ctx, registry).await,
                WorkflowStep::SubWorkflow(s) => s.execute(ctx, registry).await,
            }
        })
    }
}

/// Translate a step body result into a step outcome, mapping the suspended
/// error variant onto a suspension.
pub(crate) fn outcome_from_body(result: StepResult<Value>) -> StepResult<StepOutcome> {
    match result {
        Ok(output) => Ok(StepOutcome::Completed {
            output,
            branches: Vec::new(),
        }),
        Err(StepError::Suspended { reason }) => Ok(StepOutcome::Suspended {
            reason,
            step_state: None,
        }),
        Err(e) => Err(e),
    }
}
