//! Standby Core - Active/Passive Replication Core
//!
//! This crate provides the pieces a clustered server needs so that a passive
//! (standby) replica can take over from the active without reordering
//! client-visible changes:
//! - Transaction order ledger: client-local transaction ids mapped onto one
//!   durable global order, for deterministic replay after fail-over
//! - Passive synchronization protocol: the framed state machine that streams a
//!   snapshot of every entity from the active to a joining passive
//! - Topology registry: the cluster member set and its change notifications
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              ReplicationCore                  │
//! └──────┬──────────────────┬──────────────┬──────┘
//!        │                  │              │
//! ┌──────┴───────┐  ┌───────┴──────┐  ┌────┴──────────┐
//! │   Ledger     │  │  Sync proto  │  │   Topology    │
//! │ (global seq) │  │ (envelopes)  │  │  (members)    │
//! └──────┬───────┘  └──────────────┘  └───────────────┘
//!        │
//! ┌──────┴──────────────────────┐
//! │ KeyValueStore (LMDB/memory) │
//! └─────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod replication;
pub mod sync;
pub mod testing;
pub mod topology;
pub mod types;

pub use config::StandbyConfig;
pub use error::{Error, Result};
pub use ledger::TransactionOrderLedger;
pub use replication::{ReplicationCore, SyncTargets};
pub use topology::TopologyRegistry;
