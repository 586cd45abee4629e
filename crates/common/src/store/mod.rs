//! Best-effort local cache of the fact store.
//!
//! The repo is saved as a [`Snapshot`] through a [`SnapshotStore`].
//!  Anything that cannot be read back, including a snapshot written
//!  by another storage version, is discarded and rebuilt from scratch.

mod fs;
mod memory;
mod provider;

use serde::{Deserialize, Serialize};

use crate::bucket::Bucket;
use crate::repo::SignatureIndex;

pub use fs::{FsSnapshotStore, FsSnapshotStoreError};
pub use memory::{MemorySnapshotStore, MemorySnapshotStoreError};
pub use provider::{SnapshotStore, StoreError};

/// Bump whenever the persisted layout changes
pub const STORAGE_VERSION: u32 = 5;

/// Everything persisted about a repo. `version` must stay the first field:
///  file stores read it before decoding the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub root: Bucket,
    pub signatures: SignatureIndex,
}
