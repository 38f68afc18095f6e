//! Testing infrastructure for Standby Core
//!
//! Shared helpers for unit and integration tests:
//!
//! - **TestContext**: temporary directory that is removed on drop
//! - **Ledger setup**: ledgers over LMDB (inside a `TestContext`) or memory
//! - **RecordingSink**: a [`SyncSink`](crate::sync::SyncSink) that rebuilds
//!   partition state and counts discards
//! - **RecordingListener**: a topology listener that logs every delta
//!
//! # Usage
//!
//! ```rust,no_run
//! use standby_core::testing::setup_test_ledger;
//! use standby_core::types::{ClientId, TransactionId};
//!
//! fn my_test() -> standby_core::Result<()> {
//!     let (ledger, _ctx) = setup_test_ledger()?;
//!     ledger.record_transaction(ClientId::new(1), TransactionId::new(1), TransactionId::new(1))?;
//!     Ok(())
//! }
//! ```

mod context;
mod ledger;
mod listener;
mod sink;

pub use context::{TEST_MAP_SIZE, TestContext};
pub use ledger::{memory_ledger, reopen_test_ledger, setup_test_ledger};
pub use listener::RecordingListener;
pub use sink::{ReceivedEntity, RecordingSink};
