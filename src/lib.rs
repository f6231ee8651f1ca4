//! # Stepflow — a durable step-workflow execution engine
//!
//! `stepflow` runs a user-defined sequence of typed steps against a
//! validated input, tracks execution progress, and supports suspending a
//! run mid-flight and resuming it later from a persisted checkpoint. A
//! scheduling facility drives workflows on a recurring cron schedule with
//! overlap prevention and execution limits.
//!
//! - **Steps**: sequential transform, conditional branch, parallel fan-out
//!   with all/race semantics, and nested sub-workflows, composed as an
//!   ordered list.
//! - **Suspend/resume**: cooperative cancellation through a
//!   [`SuspendController`]; graceful (step-boundary) and immediate
//!   (signal-propagating) modes; checkpoints capture the minimal state
//!   needed to continue.
//! - **Registry**: process-wide discovery of workflow definitions and
//!   in-flight or suspended executions for resume.
//! - **Scheduling**: six-field cron expressions with IANA timezones,
//!   no-overlap, execution limits, and optional jitter.
//! - **Pluggable collaborators**: payload validation and persistence are
//!   injected capabilities, not bound libraries.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use stepflow::{and_then, RunOptions, StepContext, Workflow, WorkflowRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = WorkflowRegistry::new();
//!     let workflow = Workflow::builder("greet", "Greeting workflow")
//!         .registry(registry.clone())
//!         .step(and_then("join", "Join name", |ctx: StepContext| async move {
//!             let name = ctx.data["name"].as_str().unwrap_or_default();
//!             Ok(json!({ "name": format!("{name} john") }))
//!         }))
//!         .build()
//!         .unwrap();
//!     registry.register_workflow(workflow.clone());
//!
//!     let result = workflow.run(json!({"name": "Who is"}), RunOptions::default()).await;
//!     println!("{:?}", result.result);
//! }
//! ```

pub mod core;
pub mod error;
pub mod persistence;
pub mod registry;
pub mod scheduler;
pub mod steps;
pub mod validation;
pub mod workflow;

pub use crate::core::{
    create_suspend_controller, decode_checkpoint, encode_checkpoint, Checkpoint, CheckpointError,
    CheckpointStore, ExecutionResult, ExecutionSnapshot, ExecutionStatus, FileCheckpointStore,
    MemoryCheckpointStore, ResumeOptions, ResumeRunOptions, RunOptions, SuspendController,
    SuspensionMetadata, SuspensionMode,
};
pub use crate::error::{StepError, StepResult, WorkflowError, WorkflowResult};
pub use crate::persistence::{
    HistoryStatus, InMemoryPersistence, Persistence, PersistenceError, StepHistoryEntry,
    StepStatus, StepUpdate, TimelineEvent, WorkflowHistoryEntry, WorkflowStats,
};
pub use crate::registry::{ExecutionPhase, WorkflowRegistry};
pub use crate::scheduler::{
    create_scheduler, CreateSchedulerParams, ScheduleCallback, ScheduleHandle, ScheduleResultHook,
    SchedulerOptions,
};
pub use crate::steps::{
    and_then, parallel_all, parallel_race, sub_workflow, when, ResumeContext, StepContext,
    StepKind, WorkflowStep,
};
pub use crate::validation::{
    AnyValidator, FnValidator, ObjectFields, SharedValidator, ValidationError, Validator,
};
pub use crate::workflow::{
    HookFn, ScheduledRunOptions, Workflow, WorkflowBuilder, WorkflowHooks,
    WorkflowScheduleOptions,
};
