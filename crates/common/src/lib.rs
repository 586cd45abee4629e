/**
 * Wall-clock helpers, all times are Unix seconds.
 */
pub mod clock;
/**
 * Transport framing: a JSON envelope around
 *  one wire message.
 */
pub mod envelope;
/**
 * The wire grammar: propose, dismiss, signed,
 *  ping and pong lines.
 */
pub mod message;
/**
 * Validity windows of claims.
 */
pub mod validity;

pub mod bucket;
pub mod handle;
pub mod item;
pub mod repo;
pub mod stats;
/**
 * Persistence port for the local cache, with
 *  in-memory and on-disk providers.
 */
pub mod store;
pub mod transport;

pub use validity::Validity;

pub mod prelude {
    pub use crate::bucket::{Address, Bucket, BucketError, Endorsement, HookEvent, HookFn};
    pub use crate::clock::{now, Timestamp};
    pub use crate::envelope::{CouldNotReadEnvelope, Envelope, PayloadCodec};
    pub use crate::handle::RepoHandle;
    pub use crate::item::{BucketDataItem, Evidence};
    pub use crate::message::{content_hash, CouldNotInterpret, Message};
    pub use crate::repo::{DistributedRepo, ProcessFailure, RebroadcastPolicy};
    pub use crate::store::{FsSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotStore};
    pub use crate::transport::{MemoryTransport, Transport, TransportError};
    pub use crate::validity::Validity;
}
