//! Test helpers for creating ledgers

use super::context::TestContext;
use crate::Result;
use crate::ledger::TransactionOrderLedger;
use crate::persistence::{LmdbStore, MemoryStore};
use std::sync::Arc;

/// Ledger over a fresh LMDB store inside a new [`TestContext`].
///
/// Keep the returned context alive for the duration of the test.
pub fn setup_test_ledger() -> Result<(TransactionOrderLedger, TestContext)> {
    let ctx = TestContext::new();
    let ledger = reopen_test_ledger(&ctx)?;
    Ok((ledger, ctx))
}

/// Open (or reopen) the LMDB-backed ledger that lives in `ctx`
pub fn reopen_test_ledger(ctx: &TestContext) -> Result<TransactionOrderLedger> {
    let store = LmdbStore::open(&ctx.ledger_config())?;
    TransactionOrderLedger::open(Arc::new(store))
}

/// Ledger over a [`MemoryStore`]
pub fn memory_ledger() -> TransactionOrderLedger {
    TransactionOrderLedger::open(Arc::new(MemoryStore::new()))
        .expect("memory store cannot fail to open")
}
