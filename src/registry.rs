//! Process-wide workflow registry.
//!
//! Maps workflow ids to definitions and tracks active and suspended
//! executions so that in-flight runs are discoverable for resume. The
//! registry is an explicit value injected into workflows and schedulers;
//! [`WorkflowRegistry::global`] provides a lazily-created default instance
//! for ergonomic use. Tests inject fresh instances instead of clearing the
//! shared one.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::warn;

use crate::core::execution::SuspensionMetadata;
use crate::workflow::Workflow;

static GLOBAL: Lazy<WorkflowRegistry> = Lazy::new(WorkflowRegistry::new);

/// Lifecycle phase of a tracked execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Running,
    Suspended,
    Completed,
    Error,
}

struct ExecutionEntry {
    workflow_id: String,
    phase: ExecutionPhase,
    suspension: Option<SuspensionMetadata>,
    last_event_sequence: u64,
}

#[derive(Default)]
struct RegistryInner {
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
    executions: RwLock<HashMap<String, ExecutionEntry>>,
}

/// Keyed store of workflow definitions plus execution tracking.
///
/// Cheap to clone; clones share the same underlying maps. Mutation is
/// append/overwrite keyed by id, one lock per map.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    inner: Arc<RegistryInner>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lazily-constructed process-wide default instance.
    pub fn global() -> WorkflowRegistry {
        GLOBAL.clone()
    }

    /// Register a workflow under its id. Overwrites on conflict with a
    /// warning.
    pub fn register_workflow(&self, workflow: Arc<Workflow>) {
        let id = workflow.id.clone();
        let previous = self.inner.workflows.write().insert(id.clone(), workflow);
        if previous.is_some() {
            warn!(workflow_id = %id, "overwriting previously registered workflow");
        }
    }

    pub fn get_workflow(&self, id: &str) -> Option<Arc<Workflow>> {
        self.inner.workflows.read().get(id).cloned()
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        self.inner.workflows.read().keys().cloned().collect()
    }

    /// Execution ids currently running or suspended for a workflow.
    pub fn active_executions(&self, workflow_id: &str) -> Vec<String> {
        self.inner
            .executions
            .read()
            .iter()
            .filter(|(_, entry)| {
                entry.workflow_id == workflow_id
                    && matches!(
                        entry.phase,
                        ExecutionPhase::Running | ExecutionPhase::Suspended
                    )
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Execution ids currently suspended for a workflow.
    pub fn suspended_executions(&self, workflow_id: &str) -> Vec<String> {
        self.inner
            .executions
            .read()
            .iter()
            .filter(|(_, entry)| {
                entry.workflow_id == workflow_id && entry.phase == ExecutionPhase::Suspended
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn execution_phase(&self, execution_id: &str) -> Option<ExecutionPhase> {
        self.inner
            .executions
            .read()
            .get(execution_id)
            .map(|entry| entry.phase)
    }

    pub(crate) fn begin_execution(&self, execution_id: &str, workflow_id: &str) {
        self.inner.executions.write().insert(
            execution_id.to_string(),
            ExecutionEntry {
                workflow_id: workflow_id.to_string(),
                phase: ExecutionPhase::Running,
                suspension: None,
                last_event_sequence: 0,
            },
        );
    }

    pub(crate) fn finish_execution(
        &self,
        execution_id: &str,
        phase: ExecutionPhase,
        last_event_sequence: u64,
    ) {
        if let Some(entry) = self.inner.executions.write().get_mut(execution_id) {
            entry.phase = phase;
            entry.suspension = None;
            entry.last_event_sequence = last_event_sequence;
        }
    }

    pub(crate) fn suspend_execution(&self, execution_id: &str, metadata: SuspensionMetadata) {
        if let Some(entry) = self.inner.executions.write().get_mut(execution_id) {
            entry.phase = ExecutionPhase::Suspended;
            entry.last_event_sequence = metadata.last_event_sequence;
            entry.suspension = Some(metadata);
        }
    }

    /// Consume the suspension for an execution, marking it running again.
    /// Returns `None` for unknown or non-suspended executions; a second call
    /// for the same suspension returns `None` as well.
    pub(crate) fn take_suspension(&self, execution_id: &str) -> Option<SuspensionMetadata> {
        let mut executions = self.inner.executions.write();
        let entry = executions.get_mut(execution_id)?;
        let suspension = entry.suspension.take()?;
        entry.phase = ExecutionPhase::Running;
        Some(suspension)
    }

    pub(crate) fn last_event_sequence(&self, execution_id: &str) -> Option<u64> {
        self.inner
            .executions
            .read()
            .get(execution_id)
            .map(|entry| entry.last_event_sequence)
    }
}
