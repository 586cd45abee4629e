use std::fmt::{Debug, Display};

use async_trait::async_trait;

use super::Snapshot;

#[derive(thiserror::Error, Debug)]
pub enum StoreError<T> {
    #[error("unhandled snapshot store provider error: {0}")]
    Provider(#[from] T),
    /// The snapshot was written by a different storage version
    #[error("storage version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    /// The snapshot exists but cannot be decoded
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    type Error: Display + Debug + Send + Sync;

    /// Read the last saved snapshot
    ///
    /// # Returns
    /// * `Ok(Some(snapshot))` - A snapshot of the current storage version
    /// * `Ok(None)` - Nothing has been saved yet
    /// * `Err(StoreError::VersionMismatch)` - A snapshot from another version exists
    /// * `Err(StoreError::Corrupt)` - A snapshot exists but could not be decoded
    async fn load(&self) -> Result<Option<Snapshot>, StoreError<Self::Error>>;

    /// Replace the saved snapshot
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError<Self::Error>>;

    /// Forget the saved snapshot, if any
    async fn reset(&self) -> Result<(), StoreError<Self::Error>>;
}
