use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::provider::{SnapshotStore, StoreError};
use super::{Snapshot, STORAGE_VERSION};

/// In-memory snapshot store, for tests and ephemeral nodes
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<RwLock<Option<Snapshot>>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemorySnapshotStoreError {
    #[error("memory store error: {0}")]
    Internal(String),
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    type Error = MemorySnapshotStoreError;

    async fn load(&self) -> Result<Option<Snapshot>, StoreError<Self::Error>> {
        let inner = self.inner.read().map_err(|e| {
            StoreError::Provider(MemorySnapshotStoreError::Internal(format!(
                "failed to acquire read lock: {}",
                e
            )))
        })?;

        match inner.as_ref() {
            Some(snapshot) if snapshot.version != STORAGE_VERSION => {
                Err(StoreError::VersionMismatch {
                    found: snapshot.version,
                    expected: STORAGE_VERSION,
                })
            }
            other => Ok(other.cloned()),
        }
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError<Self::Error>> {
        let mut inner = self.inner.write().map_err(|e| {
            StoreError::Provider(MemorySnapshotStoreError::Internal(format!(
                "failed to acquire write lock: {}",
                e
            )))
        })?;

        *inner = Some(snapshot.clone());
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError<Self::Error>> {
        let mut inner = self.inner.write().map_err(|e| {
            StoreError::Provider(MemorySnapshotStoreError::Internal(format!(
                "failed to acquire write lock: {}",
                e
            )))
        })?;

        *inner = None;
        Ok(())
    }
}
