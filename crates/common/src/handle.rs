use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::Value;

use crate::bucket::BucketError;
use crate::envelope::Envelope;
use crate::repo::{DistributedRepo, RebroadcastPolicy};
use crate::store::{SnapshotStore, StoreError, STORAGE_VERSION};
use crate::transport::Transport;

/// Shared, cloneable access to a [`DistributedRepo`].
///
/// All mutation goes through one writer lock, so a message is either
///  fully applied or not visible at all. Hooks run while that lock is
///  held and must not call back into the handle.
#[derive(Debug, Clone, Default)]
pub struct RepoHandle {
    inner: Arc<RwLock<DistributedRepo>>,
}

impl From<DistributedRepo> for RepoHandle {
    fn from(repo: DistributedRepo) -> Self {
        Self {
            inner: Arc::new(RwLock::new(repo)),
        }
    }
}

impl RepoHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the repo from `store`, starting empty if the cache is missing,
    ///  from another storage version, or unreadable. Never fails.
    ///
    /// The cache is written back only after a reset.
    pub async fn open<S: SnapshotStore>(store: &S) -> Self {
        match store.load().await {
            Ok(Some(snapshot)) => {
                tracing::info!(version = STORAGE_VERSION, "loaded cache");
                Self::from(DistributedRepo::from_snapshot(snapshot))
            }
            Ok(None) => Self::new(),
            Err(StoreError::VersionMismatch { found, expected }) => {
                tracing::warn!(found, expected, "resetting cache because of version");
                Self::reset(store).await
            }
            Err(e) => {
                tracing::warn!("resetting cache: {}", e);
                Self::reset(store).await
            }
        }
    }

    /// Drop the cache and persist an empty repo stamped with the current version
    async fn reset<S: SnapshotStore>(store: &S) -> Self {
        if let Err(e) = store.reset().await {
            tracing::warn!("could not reset cache: {}", e);
        }
        let handle = Self::new();
        if let Err(e) = handle.sync(store).await {
            tracing::warn!("could not write cache: {}", e);
        }
        handle
    }

    /// Persist the current state. The snapshot is taken under the read
    ///  lock and written after it is released.
    pub async fn sync<S: SnapshotStore>(&self, store: &S) -> Result<(), StoreError<S::Error>> {
        let snapshot = self.read().snapshot();
        store.save(&snapshot).await
    }

    pub fn read(&self) -> RwLockReadGuard<'_, DistributedRepo> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, DistributedRepo> {
        self.inner.write()
    }

    pub fn init_bucket(&self, path: &[String], allowed: &[String]) {
        self.write().init_bucket(path, allowed);
    }

    /// Apply one wire message, logging and dropping it on failure
    pub fn receive(&self, text: &str, from_channel: &str) -> bool {
        match self.write().process(text, from_channel) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(channel = %from_channel, "{}", e);
                false
            }
        }
    }

    /// Unwrap a JSON envelope and apply its payload
    pub fn receive_envelope(&self, json: &str, from_channel: &str) -> bool {
        match Envelope::from_json(json) {
            Ok(envelope) => {
                tracing::trace!(channel = %from_channel, "received\n{}", envelope.verbose());
                self.receive(&envelope.payload, from_channel)
            }
            Err(e) => {
                tracing::warn!(channel = %from_channel, "dropping frame: {}", e);
                false
            }
        }
    }

    pub fn query(&self, path: &[String]) -> Result<BTreeSet<String>, BucketError> {
        self.read().query(path)
    }

    pub fn summary(&self) -> String {
        self.read().summary()
    }

    pub fn summary_messages(&self) -> Vec<String> {
        self.read().summary_messages()
    }

    pub fn summary_dict(&self) -> Value {
        self.read().summary_dict()
    }

    pub fn cleanup(&self) {
        self.write().cleanup();
    }

    /// Rebroadcast from `path` and hand the envelopes to `transport`.
    ///  Returns how many were sent.
    pub fn rebroadcast_to<T: Transport + ?Sized>(
        &self,
        transport: &T,
        path: &[String],
        channels: &[String],
        policy: &RebroadcastPolicy,
    ) -> usize {
        let envelopes = match self.write().rebroadcast(path, channels, policy) {
            Ok(envelopes) => envelopes,
            Err(e) => {
                tracing::debug!("nothing to rebroadcast: {}", e);
                return 0;
            }
        };

        let mut sent = 0;
        for envelope in envelopes {
            match transport.send(&envelope.to, &envelope.to_json()) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(channel = %envelope.to, "could not send: {}", e),
            }
        }
        sent
    }
}
