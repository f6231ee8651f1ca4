use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::types::Checkpoint;

#[derive(Debug, thiserror::Error, Clone)]
pub enum CheckpointError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Checkpoint not found for execution: {0}")]
    NotFound(String),
    #[error("Checkpoint corrupted: {0}")]
    Corrupted(String),
}

/// Durable storage for checkpoints, keyed by execution id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(
        &self,
        execution_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), CheckpointError>;
    async fn load(&self, execution_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;
    async fn delete(&self, execution_id: &str) -> Result<(), CheckpointError>;
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: tokio::sync::RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            data: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        execution_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), CheckpointError> {
        self.data
            .write()
            .await
            .insert(execution_id.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.data.read().await.get(execution_id).cloned())
    }

    async fn delete(&self, execution_id: &str) -> Result<(), CheckpointError> {
        self.data.write().await.remove(execution_id);
        Ok(())
    }
}

/// One JSON file per execution under a configured directory.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| CheckpointError::StorageError(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", execution_id))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(
        &self,
        execution_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), CheckpointError> {
        let path = self.path_for(execution_id);
        let bytes = serde_json::to_vec(checkpoint)
            .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| CheckpointError::StorageError(e.to_string()))
    }

    async fn load(&self, execution_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(execution_id);
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::StorageError(e.to_string())),
        };

        let checkpoint = serde_json::from_slice::<Checkpoint>(&bytes)
            .map_err(|e| CheckpointError::Corrupted(e.to_string()))?;
        Ok(Some(checkpoint))
    }

    async fn delete(&self, execution_id: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(execution_id);
        let _ = tokio::fs::remove_file(path).await;
        Ok(())
    }
}
