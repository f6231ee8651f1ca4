pub mod checkpoint;
pub mod execution;
pub(crate) mod runner;
pub mod suspend;

pub use checkpoint::{
    decode_checkpoint, encode_checkpoint, Checkpoint, CheckpointError, CheckpointStore,
    FileCheckpointStore, MemoryCheckpointStore,
};
pub use execution::{
    ExecutionResult, ExecutionSnapshot, ExecutionState, ExecutionStatus, ResumeOptions,
    ResumeRunOptions, RunOptions, SuspensionMetadata, SuspensionMode,
};
pub use suspend::{create_suspend_controller, SuspendController};
