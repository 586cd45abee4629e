use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::provider::{SnapshotStore, StoreError};
use super::{Snapshot, STORAGE_VERSION};

/// Snapshot store backed by a single bincode file
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
pub enum FsSnapshotStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
}

impl FsSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io(e: std::io::Error) -> StoreError<FsSnapshotStoreError> {
        StoreError::Provider(FsSnapshotStoreError::Io(e))
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    type Error = FsSnapshotStoreError;

    async fn load(&self) -> Result<Option<Snapshot>, StoreError<Self::Error>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io(e)),
        };

        // bincode writes the leading u32 as 4 little-endian bytes
        let Some(header) = bytes.get(..4) else {
            return Err(StoreError::Corrupt(format!(
                "snapshot of {} bytes is too short",
                bytes.len()
            )));
        };
        let found = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if found != STORAGE_VERSION {
            return Err(StoreError::VersionMismatch {
                found,
                expected: STORAGE_VERSION,
            });
        }

        bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError<Self::Error>> {
        let bytes = bincode::serialize(snapshot).map_err(FsSnapshotStoreError::from)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Self::io)?;
        }
        // write aside and rename so a crash never leaves half a snapshot
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(Self::io)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(Self::io)?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError<Self::Error>> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::repo::SignatureIndex;

    fn snapshot(version: u32) -> Snapshot {
        let mut signatures = SignatureIndex::new();
        signatures
            .entry("hash".to_string())
            .or_default()
            .insert("alice".to_string(), "sig".to_string());
        Snapshot {
            version,
            root: Default::default(),
            signatures,
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_nothing() {
        let temp = TempDir::new().unwrap();
        let store = FsSnapshotStore::new(temp.path().join("cache.bin"));
        assert!(store.load().await.unwrap().is_none());
        store.reset().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let store = FsSnapshotStore::new(temp.path().join("nested").join("cache.bin"));
        store.save(&snapshot(STORAGE_VERSION)).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.signatures["hash"]["alice"], "sig");
    }

    #[tokio::test]
    async fn test_version_is_checked_before_decoding() {
        let temp = TempDir::new().unwrap();
        let store = FsSnapshotStore::new(temp.path().join("cache.bin"));
        store.save(&snapshot(STORAGE_VERSION - 1)).await.unwrap();
        assert!(matches!(
            store.load().await,
            Err(StoreError::VersionMismatch { found, .. }) if found == STORAGE_VERSION - 1
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.bin");
        let mut bytes = STORAGE_VERSION.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff; 3]);
        tokio::fs::write(&path, bytes).await.unwrap();

        let store = FsSnapshotStore::new(&path);
        assert!(matches!(store.load().await, Err(StoreError::Corrupt(_))));
        store.reset().await.unwrap();
        assert!(!path.exists());
    }
}
