//! Durable storage of execution history, step records, timeline events, and
//! checkpoints.
//!
//! The engine calls the [`Persistence`] trait at each lifecycle transition.
//! Recording is best-effort: failures are logged and do not fail the run,
//! with one exception — a resume that requires a checkpoint which was never
//! persisted (and is no longer tracked in the registry) fails.

mod memory;

pub use memory::InMemoryPersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::checkpoint::Checkpoint;

#[derive(Debug, Error, Clone)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Terminal and in-flight statuses of a whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Running,
    Suspended,
    Completed,
    Error,
    Cancelled,
}

/// Statuses of an individual step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Error,
    Skipped,
}

/// One workflow execution, as recorded by the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHistoryEntry {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: HistoryStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// One step of an execution, including skipped conditional branches and
/// parallel branch records (`parallel_index` set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepHistoryEntry {
    pub execution_id: String,
    pub step_index: usize,
    pub step_id: String,
    pub step_name: String,
    pub step_type: String,
    pub status: StepStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_index: Option<usize>,
}

/// Mutation applied to an existing step record.
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    pub status: Option<StepStatus>,
    pub output: Option<Value>,
    pub error_message: Option<String>,
}

/// Ordered event on an execution's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub execution_id: String,
    pub event_sequence: u64,
    pub name: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate statistics over recorded executions of one workflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowStats {
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub average_execution_ms: f64,
    pub last_execution_time: Option<DateTime<Utc>>,
}

/// Storage interface consumed by the runner.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create_execution(&self, entry: WorkflowHistoryEntry) -> Result<(), PersistenceError>;

    async fn update_execution(
        &self,
        execution_id: &str,
        status: HistoryStatus,
        output: Option<Value>,
    ) -> Result<(), PersistenceError>;

    async fn record_step(&self, entry: StepHistoryEntry) -> Result<(), PersistenceError>;

    async fn update_step(
        &self,
        execution_id: &str,
        step_index: usize,
        update: StepUpdate,
    ) -> Result<(), PersistenceError>;

    async fn record_timeline_event(&self, event: TimelineEvent) -> Result<(), PersistenceError>;

    async fn save_checkpoint(
        &self,
        execution_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), PersistenceError>;

    async fn load_checkpoint(
        &self,
        execution_id: &str,
    ) -> Result<Option<Checkpoint>, PersistenceError>;
}
