use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Minimal state needed to resume a suspended run.
///
/// `step_index` is the index of the step that was about to run (or was
/// interrupted); `completed_steps_data` holds the outputs of every step
/// before it, in step order. `step_execution_state` is opaque per step kind
/// (e.g. a nested checkpoint for a sub-workflow step).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Checkpoint {
    pub step_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_execution_state: Option<Value>,
    #[serde(default)]
    pub completed_steps_data: Vec<Value>,
}

impl Checkpoint {
    pub fn new(step_index: usize, completed_steps_data: Vec<Value>) -> Self {
        Self {
            step_index,
            step_execution_state: None,
            completed_steps_data,
        }
    }

    pub fn with_step_state(mut self, state: Option<Value>) -> Self {
        self.step_execution_state = state;
        self
    }

    /// Output of the last completed step, the payload a resumed run starts
    /// from when no resume data is supplied.
    pub fn last_data(&self) -> Option<&Value> {
        self.completed_steps_data.last()
    }
}
