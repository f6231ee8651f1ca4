//! Pure (de)serialization between [`Checkpoint`] and the persisted JSON
//! shape. No business logic beyond shape conversion and defensive bounds
//! validation of the step index.

use serde_json::Value;

use super::store::CheckpointError;
use super::types::Checkpoint;

/// Encode a checkpoint into its persisted JSON shape.
pub fn encode_checkpoint(checkpoint: &Checkpoint) -> Value {
    // Serialization of this shape cannot fail; fall back to Null defensively
    // rather than panic in non-test code.
    serde_json::to_value(checkpoint).unwrap_or(Value::Null)
}

/// Decode a persisted checkpoint, validating `step_index` against the step
/// list it will be replayed into.
pub fn decode_checkpoint(value: &Value, step_count: usize) -> Result<Checkpoint, CheckpointError> {
    let checkpoint: Checkpoint = serde_json::from_value(value.clone())
        .map_err(|e| CheckpointError::Corrupted(e.to_string()))?;
    if checkpoint.step_index >= step_count {
        return Err(CheckpointError::Corrupted(format!(
            "step index {} out of bounds for {} steps",
            checkpoint.step_index, step_count
        )));
    }
    if checkpoint.completed_steps_data.len() > checkpoint.step_index {
        return Err(CheckpointError::Corrupted(format!(
            "{} completed outputs recorded before step {}",
            checkpoint.completed_steps_data.len(),
            checkpoint.step_index
        )));
    }
    Ok(checkpoint)
}
