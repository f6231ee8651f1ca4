mod codec;
mod store;
mod types;

pub use codec::{decode_checkpoint, encode_checkpoint};
pub use store::{CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use types::Checkpoint;
