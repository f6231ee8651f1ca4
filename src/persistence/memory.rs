use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    HistoryStatus, Persistence, PersistenceError, StepHistoryEntry, StepUpdate, TimelineEvent,
    WorkflowHistoryEntry, WorkflowStats,
};
use crate::core::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};

/// In-memory [`Persistence`] implementation.
///
/// Default backing store for tests and single-process deployments. The
/// checkpoint backend is pluggable so durable checkpoints (e.g. a
/// [`FileCheckpointStore`](crate::core::checkpoint::FileCheckpointStore))
/// can be combined with in-memory history.
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<String, WorkflowHistoryEntry>>,
    steps: RwLock<HashMap<String, Vec<StepHistoryEntry>>>,
    timeline: RwLock<HashMap<String, Vec<TimelineEvent>>>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::with_checkpoint_store(Arc::new(MemoryCheckpointStore::new()))
    }

    pub fn with_checkpoint_store(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
            timeline: RwLock::new(HashMap::new()),
            checkpoints,
        }
    }

    pub async fn execution(&self, execution_id: &str) -> Option<WorkflowHistoryEntry> {
        self.executions.read().await.get(execution_id).cloned()
    }

    pub async fn steps_for(&self, execution_id: &str) -> Vec<StepHistoryEntry> {
        self.steps
            .read()
            .await
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn timeline_for(&self, execution_id: &str) -> Vec<TimelineEvent> {
        self.timeline
            .read()
            .await
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Aggregate statistics over recorded executions of one workflow.
    pub async fn stats(&self, workflow_id: &str) -> WorkflowStats {
        let executions = self.executions.read().await;
        let mut stats = WorkflowStats::default();
        let mut total_ms = 0.0;
        let mut timed = 0usize;

        for entry in executions.values() {
            if entry.workflow_id != workflow_id {
                continue;
            }
            stats.total_executions += 1;
            match entry.status {
                HistoryStatus::Completed => stats.successful_executions += 1,
                HistoryStatus::Error => stats.failed_executions += 1,
                _ => {}
            }
            if let Some(end) = entry.end_time {
                total_ms += (end - entry.start_time).num_milliseconds() as f64;
                timed += 1;
            }
            stats.last_execution_time = match stats.last_execution_time {
                Some(last) if last >= entry.start_time => Some(last),
                _ => Some(entry.start_time),
            };
        }
        if timed > 0 {
            stats.average_execution_ms = total_ms / timed as f64;
        }
        stats
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn create_execution(&self, entry: WorkflowHistoryEntry) -> Result<(), PersistenceError> {
        self.executions
            .write()
            .await
            .insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn update_execution(
        &self,
        execution_id: &str,
        status: HistoryStatus,
        output: Option<Value>,
    ) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().await;
        let entry = executions
            .get_mut(execution_id)
            .ok_or_else(|| PersistenceError::NotFound(execution_id.to_string()))?;
        entry.status = status;
        if output.is_some() {
            entry.output = output;
        }
        entry.end_time = Some(chrono::Utc::now());
        Ok(())
    }

    async fn record_step(&self, entry: StepHistoryEntry) -> Result<(), PersistenceError> {
        self.steps
            .write()
            .await
            .entry(entry.execution_id.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn update_step(
        &self,
        execution_id: &str,
        step_index: usize,
        update: StepUpdate,
    ) -> Result<(), PersistenceError> {
        let mut steps = self.steps.write().await;
        let entries = steps
            .get_mut(execution_id)
            .ok_or_else(|| PersistenceError::NotFound(execution_id.to_string()))?;
        let entry = entries
            .iter_mut()
            .rev()
            .find(|e| e.step_index == step_index && e.parallel_index.is_none())
            .ok_or_else(|| {
                PersistenceError::NotFound(format!("{execution_id}:{step_index}"))
            })?;
        if let Some(status) = update.status {
            entry.status = status;
        }
        if update.output.is_some() {
            entry.output = update.output;
        }
        if update.error_message.is_some() {
            entry.error_message = update.error_message;
        }
        entry.end_time = Some(chrono::Utc::now());
        Ok(())
    }

    async fn record_timeline_event(&self, event: TimelineEvent) -> Result<(), PersistenceError> {
        self.timeline
            .write()
            .await
            .entry(event.execution_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn save_checkpoint(
        &self,
        execution_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), PersistenceError> {
        self.checkpoints
            .save(execution_id, checkpoint)
            .await
            .map_err(|e| PersistenceError::Storage(e.to_string()))
    }

    async fn load_checkpoint(
        &self,
        execution_id: &str,
    ) -> Result<Option<Checkpoint>, PersistenceError> {
        self.checkpoints
            .load(execution_id)
            .await
            .map_err(|e| PersistenceError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::StepStatus;
    use chrono::Utc;
    use serde_json::json;

    fn sample_execution(id: &str, workflow_id: &str) -> WorkflowHistoryEntry {
        WorkflowHistoryEntry {
            id: id.to_string(),
            workflow_id: workflow_id.to_string(),
            workflow_name: "test".into(),
            status: HistoryStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            input: json!({"name": "Who is"}),
            output: None,
            user_id: None,
            conversation_id: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let store = InMemoryPersistence::new();
        store
            .create_execution(sample_execution("exec-1", "wf"))
            .await
            .unwrap();

        store
            .update_execution("exec-1", HistoryStatus::Completed, Some(json!({"ok": true})))
            .await
            .unwrap();

        let entry = store.execution("exec-1").await.unwrap();
        assert_eq!(entry.status, HistoryStatus::Completed);
        assert_eq!(entry.output, Some(json!({"ok": true})));
        assert!(entry.end_time.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_execution_errors() {
        let store = InMemoryPersistence::new();
        let err = store
            .update_execution("missing", HistoryStatus::Error, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_step_records_and_updates() {
        let store = InMemoryPersistence::new();
        store
            .record_step(StepHistoryEntry {
                execution_id: "exec-1".into(),
                step_index: 0,
                step_id: "step-1".into(),
                step_name: "first".into(),
                step_type: "func".into(),
                status: StepStatus::Running,
                start_time: Utc::now(),
                end_time: None,
                input: Some(json!(1)),
                output: None,
                error_message: None,
                parallel_index: None,
            })
            .await
            .unwrap();

        store
            .update_step(
                "exec-1",
                0,
                StepUpdate {
                    status: Some(StepStatus::Completed),
                    output: Some(json!(2)),
                    error_message: None,
                },
            )
            .await
            .unwrap();

        let steps = store.steps_for("exec-1").await;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[0].output, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip() {
        let store = InMemoryPersistence::new();
        let cp = Checkpoint::new(1, vec![json!("a")]);
        store.save_checkpoint("exec-1", &cp).await.unwrap();
        assert_eq!(store.load_checkpoint("exec-1").await.unwrap(), Some(cp));
        assert_eq!(store.load_checkpoint("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = InMemoryPersistence::new();
        store
            .create_execution(sample_execution("exec-1", "wf"))
            .await
            .unwrap();
        store
            .create_execution(sample_execution("exec-2", "wf"))
            .await
            .unwrap();
        store
            .create_execution(sample_execution("exec-3", "other"))
            .await
            .unwrap();

        store
            .update_execution("exec-1", HistoryStatus::Completed, None)
            .await
            .unwrap();
        store
            .update_execution("exec-2", HistoryStatus::Error, None)
            .await
            .unwrap();

        let stats = store.stats("wf").await;
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.failed_executions, 1);
        assert!(stats.last_execution_time.is_some());
    }
}
