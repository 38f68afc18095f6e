//! Passive synchronization protocol
//!
//! An active server brings a new passive up to date by streaming a snapshot
//! of every entity over the replication channel:
//!
//! ```text
//! StreamBegin
//!   EntityBegin(e, config, deletable)
//!     PartitionBegin(key > 0)
//!       PartitionPayload*        (order preserving)
//!     PartitionEnd
//!   EntityEnd
//! StreamEnd(trailer)
//! ```
//!
//! Units share the channel with live replicated operations and are told
//! apart by their [`ReplicationType`].

pub mod envelope;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod state;

pub use envelope::{MAX_FRAME_BODY, MAX_PAYLOAD_CHUNK, ReplicationEnvelope, ReplicationType};
pub use message::{Inbound, SyncMessage};
pub use receiver::{PassiveSyncReceiver, ReceiveStats, SyncSink, receive_stream};
pub use sender::{ActiveSyncSender, EntitySnapshot, SyncStats};
pub use state::{SyncState, SyncValidator};

/// Synchronization wire protocol version, carried by `StreamBegin`
pub const PROTOCOL_VERSION: u32 = 1;
