//! Parallel fan-out steps: all-of and first-of semantics.

use futures::future::{select_all, try_join_all, BoxFuture};
use serde_json::Value;

use super::{BranchRecord, StepContext, StepOutcome, WorkflowStep};
use crate::error::{StepError, StepResult};
use crate::persistence::StepStatus;
use crate::registry::WorkflowRegistry;

pub struct ParallelAllStep {
    pub id: String,
    pub name: String,
    pub(crate) branches: Vec<WorkflowStep>,
}

impl ParallelAllStep {
    /// Execute all branches concurrently against the same input. The output
    /// is the list of branch outputs in declaration order. The first failure
    /// propagates; remaining branch outcomes are discarded.
    pub(crate) async fn execute(
        &self,
        ctx: StepContext,
        registry: &WorkflowRegistry,
    ) -> StepResult<StepOutcome> {
        // Zero branches yields an empty result list without error.
        let futures = self.branches.iter().map(|branch| {
            let branch_ctx = ctx.for_branch(ctx.signal.clone());
            async move {
                match branch.execute(branch_ctx, registry).await? {
                    StepOutcome::Completed { output, .. } => Ok(output),
                    StepOutcome::Suspended { .. } => Err(StepError::SuspendedInParallel),
                }
            }
        });

        let outputs = try_join_all(futures).await?;
        let branches = self
            .branches
            .iter()
            .zip(outputs.iter())
            .enumerate()
            .map(|(index, (branch, output))| BranchRecord {
                step_id: branch.id().to_string(),
                step_name: branch.name().to_string(),
                step_type: branch.kind().as_str(),
                index,
                status: StepStatus::Completed,
                output: Some(output.clone()),
            })
            .collect();

        Ok(StepOutcome::Completed {
            output: Value::Array(outputs),
            branches,
        })
    }
}

pub struct ParallelRaceStep {
    pub id: String,
    pub name: String,
    pub(crate) branches: Vec<WorkflowStep>,
}

impl ParallelRaceStep {
    /// Execute all branches concurrently; the first branch to settle decides
    /// the outcome. Losing branches are cancelled through a child of the
    /// step's abort signal, best-effort.
    pub(crate) async fn execute(
        &self,
        ctx: StepContext,
        registry: &WorkflowRegistry,
    ) -> StepResult<StepOutcome> {
        if self.branches.is_empty() {
            // Guarded at build time; kept as a defensive check for steps
            // constructed outside the builder.
            return Err(StepError::message(format!(
                "parallel-race step '{}' requires at least one branch",
                self.id
            )));
        }

        let race_signal = ctx.signal.child_token();
        let futures: Vec<BoxFuture<'_, (usize, StepResult<StepOutcome>)>> = self
            .branches
            .iter()
            .enumerate()
            .map(|(index, branch)| {
                let branch_ctx = ctx.for_branch(race_signal.clone());
                let fut: BoxFuture<'_, (usize, StepResult<StepOutcome>)> =
                    Box::pin(async move { (index, branch.execute(branch_ctx, registry).await) });
                fut
            })
            .collect();

        let ((winner_index, winner_result), _, _losers) = select_all(futures).await;
        race_signal.cancel();

        match winner_result? {
            StepOutcome::Completed { output, .. } => {
                let branches = self
                    .branches
                    .iter()
                    .enumerate()
                    .map(|(index, branch)| BranchRecord {
                        step_id: branch.id().to_string(),
                        step_name: branch.name().to_string(),
                        step_type: branch.kind().as_str(),
                        index,
                        status: if index == winner_index {
                            StepStatus::Completed
                        } else {
                            StepStatus::Skipped
                        },
                        output: (index == winner_index).then(|| output.clone()),
                    })
                    .collect();
                Ok(StepOutcome::Completed { output, branches })
            }
            StepOutcome::Suspended { .. } => Err(StepError::SuspendedInParallel),
        }
    }
}

/// Build a parallel-all step: every branch runs concurrently over the same
/// input; the output is the ordered list of branch outputs.
pub fn parallel_all(
    id: impl Into<String>,
    name: impl Into<String>,
    branches: Vec<WorkflowStep>,
) -> WorkflowStep {
    WorkflowStep::ParallelAll(ParallelAllStep {
        id: id.into(),
        name: name.into(),
        branches,
    })
}

/// Build a parallel-race step: every branch runs concurrently; the first to
/// settle wins. At least one branch is required.
pub fn parallel_race(
    id: impl Into<String>,
    name: impl Into<String>,
    branches: Vec<WorkflowStep>,
) -> WorkflowStep {
    WorkflowStep::ParallelRace(ParallelRaceStep {
        id: id.into(),
        name: name.into(),
        branches,
    })
}
