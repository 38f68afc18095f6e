//! Transaction order ledger
//!
//! Maps the client-local transaction ids of in-flight transactions onto a
//! single global order. The mapping is persisted because a passive that takes
//! over after a restart must replay reconnecting clients' transactions in the
//! same order they were originally applied.
//!
//! # Layout
//!
//! ```text
//! client_local_lists / <client id, big-endian>  →  [LedgerEntry ...]   (bincode)
//! counter received_transaction_count            →  last assigned global sequence
//! ```
//!
//! Each bucket is ordered by insertion, which is both local-id order and
//! global-sequence order. The global order is therefore a k-way merge of the
//! buckets; it is cached until the next mutation.

use crate::persistence::{KeyValueStore, WriteBatch};
use crate::types::{ClientId, TransactionId};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

const CLIENT_LOCAL_LISTS: &str = "client_local_lists";
const RECEIVED_TRANSACTION_COUNT: &str = "received_transaction_count";

/// One persisted bucket element. The owning client is the bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Client-local transaction id
    pub local_id: TransactionId,
    /// Position in the global arrival order
    pub global_seq: u64,
}

/// A retained transaction together with its owning client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplayKey {
    /// Owning client
    pub client: ClientId,
    /// Client-local transaction id
    pub local_id: TransactionId,
    /// Position in the global arrival order
    pub global_seq: u64,
}

/// Immutable materialization of every retained transaction in global order
#[derive(Debug, Default)]
pub struct GlobalOrder {
    entries: Vec<ReplayKey>,
    positions: HashMap<(ClientId, TransactionId), usize>,
}

impl GlobalOrder {
    fn from_sorted(entries: Vec<ReplayKey>) -> Self {
        let positions = entries
            .iter()
            .enumerate()
            .map(|(index, key)| ((key.client, key.local_id), index))
            .collect();
        Self { entries, positions }
    }

    /// Index of a client transaction in replay order
    pub fn index_of(&self, client: ClientId, local_id: TransactionId) -> Option<usize> {
        self.positions.get(&(client, local_id)).copied()
    }

    /// Entries in ascending global sequence
    pub fn entries(&self) -> &[ReplayKey] {
        &self.entries
    }

    /// Number of retained transactions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct LedgerState {
    global_order: Option<Arc<GlobalOrder>>,
}

/// Durable per-client/global transaction ordering
pub struct TransactionOrderLedger {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<LedgerState>,
}

impl TransactionOrderLedger {
    /// Bind a ledger to its store, initializing the counter on first use.
    ///
    /// Buckets left by a previous process are kept; use
    /// [`retain_clients`](Self::retain_clients) to drop clients that did not
    /// come back.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let received = match store.counter(RECEIVED_TRANSACTION_COUNT)? {
            Some(received) => received,
            None => {
                store.commit(WriteBatch::new().set_counter(RECEIVED_TRANSACTION_COUNT, 0))?;
                0
            }
        };

        let clients = store.keys(CLIENT_LOCAL_LISTS)?.len();
        tracing::info!(
            received_transactions = received,
            tracked_clients = clients,
            "Opened transaction order ledger"
        );

        Ok(Self {
            store,
            state: Mutex::new(LedgerState { global_order: None }),
        })
    }

    /// Record a newly observed transaction from `client`.
    ///
    /// Assigns the next global sequence to `(client, local_id)`, appends it to
    /// the client's bucket and trims the bucket prefix that sorts strictly
    /// before `oldest_still_needed`. The counter update and the bucket write
    /// are committed together. Returns the assigned global sequence.
    pub fn record_transaction(
        &self,
        client: ClientId,
        local_id: TransactionId,
        oldest_still_needed: TransactionId,
    ) -> Result<u64> {
        if local_id.is_null() || oldest_still_needed.is_null() {
            return Err(Error::invalid_argument("transaction ids cannot be null"));
        }
        if oldest_still_needed > local_id {
            return Err(Error::invalid_argument(format!(
                "oldest transaction {} cannot come after new transaction {}",
                oldest_still_needed, local_id
            )));
        }

        let mut state = self.state.lock();

        let mut bucket = self.load_bucket(client)?;
        if let Some(last) = bucket.last() {
            if last.local_id >= local_id {
                return Err(Error::invalid_argument(format!(
                    "{} for {} does not come after last recorded {}",
                    local_id, client, last.local_id
                )));
            }
        }

        let received = self.current_count()?;
        let global_seq = received
            .checked_add(1)
            .ok_or_else(|| Error::invariant("global transaction counter overflowed"))?;

        // Buckets are ordered, so the acknowledged records form a prefix
        let acknowledged = bucket
            .iter()
            .take_while(|entry| entry.local_id < oldest_still_needed)
            .count();
        bucket.drain(..acknowledged);
        bucket.push(LedgerEntry { local_id, global_seq });

        let encoded = encode_bucket(&bucket)?;
        state.global_order = None;
        self.store.commit(
            WriteBatch::new()
                .set_counter(RECEIVED_TRANSACTION_COUNT, global_seq)
                .put(CLIENT_LOCAL_LISTS, client.to_key(), encoded),
        )?;

        tracing::trace!(
            %client,
            %local_id,
            global_seq,
            pruned = acknowledged,
            "Recorded transaction"
        );
        Ok(global_seq)
    }

    /// Stop tracking `client` (e.g. on disconnect). Absent clients are a no-op.
    pub fn forget_client(&self, client: ClientId) -> Result<()> {
        let mut state = self.state.lock();
        let key = client.to_key();
        if !self.store.contains(CLIENT_LOCAL_LISTS, &key)? {
            return Ok(());
        }
        state.global_order = None;
        self.store.remove(CLIENT_LOCAL_LISTS, &key)?;
        tracing::debug!(%client, "Forgot transaction ordering for client");
        Ok(())
    }

    /// Forget every tracked client that is not in `live`.
    ///
    /// Returns the number of buckets dropped.
    pub fn retain_clients(&self, live: &HashSet<ClientId>) -> Result<usize> {
        let mut state = self.state.lock();
        let mut batch = WriteBatch::new();
        for key in self.store.keys(CLIENT_LOCAL_LISTS)? {
            let client = ClientId::from_key(&key)?;
            if !live.contains(&client) {
                batch = batch.remove(CLIENT_LOCAL_LISTS, key);
            }
        }
        let dropped = batch.len();
        if dropped > 0 {
            state.global_order = None;
            self.store.commit(batch)?;
            tracing::info!(dropped, "Dropped ordering for clients that did not reconnect");
        }
        Ok(dropped)
    }

    /// Position of `(client, local_id)` in global replay order.
    ///
    /// `None` if the transaction was pruned or never recorded.
    pub fn index_for_replay(&self, client: ClientId, local_id: TransactionId) -> Result<Option<usize>> {
        let mut state = self.state.lock();
        let order = self.global_order(&mut state)?;
        Ok(order.index_of(client, local_id))
    }

    /// Every retained transaction in global order
    pub fn replay_order(&self) -> Result<Arc<GlobalOrder>> {
        let mut state = self.state.lock();
        self.global_order(&mut state)
    }

    /// Drop every bucket. The global counter keeps its value.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.global_order = None;
        self.store.commit(WriteBatch::new().clear(CLIENT_LOCAL_LISTS))?;
        tracing::info!("Cleared all transaction ordering records");
        Ok(())
    }

    /// Number of transactions ever observed (not the number retained)
    pub fn received_count(&self) -> Result<u64> {
        let _state = self.state.lock();
        self.current_count()
    }

    /// Number of transactions currently retained
    pub fn retained_count(&self) -> Result<usize> {
        Ok(self.replay_order()?.len())
    }

    /// Clients that currently have a bucket, in id order
    pub fn tracked_clients(&self) -> Result<Vec<ClientId>> {
        let _state = self.state.lock();
        self.store
            .keys(CLIENT_LOCAL_LISTS)?
            .iter()
            .map(|key| ClientId::from_key(key))
            .collect()
    }

    /// Retained entries of one client's bucket, oldest first
    pub fn client_entries(&self, client: ClientId) -> Result<Vec<LedgerEntry>> {
        let _state = self.state.lock();
        self.load_bucket(client)
    }

    fn current_count(&self) -> Result<u64> {
        self.store
            .counter(RECEIVED_TRANSACTION_COUNT)?
            .ok_or_else(|| Error::storage("received transaction counter is missing"))
    }

    fn load_bucket(&self, client: ClientId) -> Result<Vec<LedgerEntry>> {
        match self.store.get(CLIENT_LOCAL_LISTS, &client.to_key())? {
            Some(bytes) => decode_bucket(&bytes),
            None => Ok(Vec::new()),
        }
    }

    fn global_order(&self, state: &mut LedgerState) -> Result<Arc<GlobalOrder>> {
        if let Some(order) = &state.global_order {
            return Ok(Arc::clone(order));
        }
        let order = Arc::new(self.rebuild_global_order()?);
        tracing::debug!(retained = order.len(), "Rebuilt global transaction order");
        state.global_order = Some(Arc::clone(&order));
        Ok(order)
    }

    fn rebuild_global_order(&self) -> Result<GlobalOrder> {
        let mut buckets = Vec::new();
        for key in self.store.keys(CLIENT_LOCAL_LISTS)? {
            let client = ClientId::from_key(&key)?;
            let bytes = self
                .store
                .get(CLIENT_LOCAL_LISTS, &key)?
                .ok_or_else(|| Error::storage(format!("bucket for {} vanished during rebuild", client)))?;
            buckets.push((client, decode_bucket(&bytes)?));
        }
        Ok(GlobalOrder::from_sorted(merge_buckets(&buckets)))
    }
}

/// K-way merge of per-client buckets, each already sorted by global sequence
fn merge_buckets(buckets: &[(ClientId, Vec<LedgerEntry>)]) -> Vec<ReplayKey> {
    let total = buckets.iter().map(|(_, bucket)| bucket.len()).sum();
    let mut merged = Vec::with_capacity(total);

    // (next global seq, bucket index, position in bucket)
    let mut heads: BinaryHeap<Reverse<(u64, usize, usize)>> = buckets
        .iter()
        .enumerate()
        .filter_map(|(b, (_, bucket))| bucket.first().map(|entry| Reverse((entry.global_seq, b, 0))))
        .collect();

    while let Some(Reverse((_, b, pos))) = heads.pop() {
        let (client, bucket) = &buckets[b];
        let entry = bucket[pos];
        merged.push(ReplayKey {
            client: *client,
            local_id: entry.local_id,
            global_seq: entry.global_seq,
        });
        if let Some(next) = bucket.get(pos + 1) {
            heads.push(Reverse((next.global_seq, b, pos + 1)));
        }
    }
    merged
}

fn encode_bucket(bucket: &[LedgerEntry]) -> Result<Vec<u8>> {
    bincode::serialize(bucket).map_err(|e| Error::storage(format!("failed to encode bucket: {}", e)))
}

fn decode_bucket(bytes: &[u8]) -> Result<Vec<LedgerEntry>> {
    bincode::deserialize(bytes).map_err(|e| Error::storage(format!("corrupt ledger bucket: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn tx(id: i64) -> TransactionId {
        TransactionId::new(id)
    }

    fn ledger() -> TransactionOrderLedger {
        TransactionOrderLedger::open(Arc::new(MemoryStore::new())).unwrap()
    }

    fn local_ids(ledger: &TransactionOrderLedger, client: ClientId) -> Vec<i64> {
        ledger
            .client_entries(client)
            .unwrap()
            .iter()
            .map(|e| e.local_id.as_i64())
            .collect()
    }

    #[test]
    fn test_open_initializes_counter() {
        let store = Arc::new(MemoryStore::new());
        let ledger = TransactionOrderLedger::open(store.clone()).unwrap();
        assert_eq!(ledger.received_count().unwrap(), 0);
        assert_eq!(store.counter(RECEIVED_TRANSACTION_COUNT).unwrap(), Some(0));
    }

    #[test]
    fn test_rejects_null_ids() {
        let ledger = ledger();
        let c = ClientId::new(1);
        assert!(matches!(
            ledger.record_transaction(c, TransactionId::NULL, tx(1)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            ledger.record_transaction(c, tx(1), TransactionId::NULL),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(ledger.received_count().unwrap(), 0);
    }

    #[test]
    fn test_rejects_oldest_after_new() {
        let ledger = ledger();
        let err = ledger.record_transaction(ClientId::new(1), tx(2), tx(3)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(ledger.received_count().unwrap(), 0);
        assert!(ledger.tracked_clients().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_increasing_local_id() {
        let ledger = ledger();
        let c = ClientId::new(1);
        ledger.record_transaction(c, tx(4), tx(1)).unwrap();
        assert!(ledger.record_transaction(c, tx(4), tx(1)).is_err());
        assert!(ledger.record_transaction(c, tx(3), tx(1)).is_err());
        assert_eq!(ledger.received_count().unwrap(), 1);
        assert_eq!(local_ids(&ledger, c), vec![4]);
    }

    #[test]
    fn test_prefix_trim_is_strict() {
        let ledger = ledger();
        let c = ClientId::new(9);
        for id in 1..=4 {
            ledger.record_transaction(c, tx(id), tx(1)).unwrap();
        }
        ledger.record_transaction(c, tx(5), tx(3)).unwrap();
        assert_eq!(local_ids(&ledger, c), vec![3, 4, 5]);
    }

    #[test]
    fn test_trim_can_empty_prefix_up_to_new_record() {
        let ledger = ledger();
        let c = ClientId::new(1);
        ledger.record_transaction(c, tx(1), tx(1)).unwrap();
        ledger.record_transaction(c, tx(2), tx(1)).unwrap();
        ledger.record_transaction(c, tx(3), tx(3)).unwrap();
        assert_eq!(local_ids(&ledger, c), vec![3]);
    }

    #[test]
    fn test_interleaved_replay_order() {
        let ledger = ledger();
        let a = ClientId::new(1);
        let b = ClientId::new(2);
        ledger.record_transaction(a, tx(1), tx(1)).unwrap();
        ledger.record_transaction(b, tx(1), tx(1)).unwrap();
        ledger.record_transaction(a, tx(2), tx(1)).unwrap();

        assert_eq!(ledger.index_for_replay(a, tx(1)).unwrap(), Some(0));
        assert_eq!(ledger.index_for_replay(b, tx(1)).unwrap(), Some(1));
        assert_eq!(ledger.index_for_replay(a, tx(2)).unwrap(), Some(2));
        assert_eq!(ledger.index_for_replay(b, tx(2)).unwrap(), None);
    }

    #[test]
    fn test_pruned_transaction_is_not_found() {
        let ledger = ledger();
        let c = ClientId::new(1);
        ledger.record_transaction(c, tx(1), tx(1)).unwrap();
        assert_eq!(ledger.index_for_replay(c, tx(1)).unwrap(), Some(0));
        ledger.record_transaction(c, tx(2), tx(2)).unwrap();
        assert_eq!(ledger.index_for_replay(c, tx(1)).unwrap(), None);
        assert_eq!(ledger.index_for_replay(c, tx(2)).unwrap(), Some(0));
    }

    #[test]
    fn test_forget_client_is_idempotent() {
        let ledger = ledger();
        let c = ClientId::new(1);
        ledger.forget_client(c).unwrap();
        ledger.record_transaction(c, tx(7), tx(7)).unwrap();
        ledger.forget_client(c).unwrap();
        ledger.forget_client(c).unwrap();
        assert_eq!(ledger.index_for_replay(c, tx(7)).unwrap(), None);

        // Behaves as a brand new client afterwards, even with a lower id
        ledger.record_transaction(c, tx(1), tx(1)).unwrap();
        assert_eq!(local_ids(&ledger, c), vec![1]);
        assert_eq!(ledger.received_count().unwrap(), 2);
    }

    #[test]
    fn test_clear_keeps_counter() {
        let ledger = ledger();
        let a = ClientId::new(1);
        ledger.record_transaction(a, tx(1), tx(1)).unwrap();
        ledger.record_transaction(a, tx(2), tx(1)).unwrap();
        assert_eq!(ledger.retained_count().unwrap(), 2);

        ledger.clear().unwrap();
        assert_eq!(ledger.index_for_replay(a, tx(1)).unwrap(), None);
        assert_eq!(ledger.index_for_replay(a, tx(2)).unwrap(), None);
        assert_eq!(ledger.received_count().unwrap(), 2);
        assert_eq!(ledger.retained_count().unwrap(), 0);

        assert_eq!(ledger.record_transaction(a, tx(3), tx(3)).unwrap(), 3);
    }

    #[test]
    fn test_cache_invalidated_by_mutation() {
        let ledger = ledger();
        let a = ClientId::new(1);
        let b = ClientId::new(2);
        ledger.record_transaction(a, tx(1), tx(1)).unwrap();
        let before = ledger.replay_order().unwrap();
        assert_eq!(before.len(), 1);

        ledger.record_transaction(b, tx(1), tx(1)).unwrap();
        let after = ledger.replay_order().unwrap();
        assert_eq!(after.len(), 2);
        // The earlier snapshot is immutable
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn test_retain_clients() {
        let ledger = ledger();
        for id in 1..=3 {
            ledger.record_transaction(ClientId::new(id), tx(1), tx(1)).unwrap();
        }
        let live: HashSet<_> = [ClientId::new(2)].into_iter().collect();
        assert_eq!(ledger.retain_clients(&live).unwrap(), 2);
        assert_eq!(ledger.tracked_clients().unwrap(), vec![ClientId::new(2)]);
        assert_eq!(ledger.index_for_replay(ClientId::new(2), tx(1)).unwrap(), Some(0));
        assert_eq!(ledger.retain_clients(&live).unwrap(), 0);
    }

    #[test]
    fn test_merge_buckets() {
        let e = |local, seq| LedgerEntry {
            local_id: tx(local),
            global_seq: seq,
        };
        let buckets = vec![
            (ClientId::new(1), vec![e(1, 1), e(2, 4), e(3, 5)]),
            (ClientId::new(2), vec![]),
            (ClientId::new(3), vec![e(10, 2), e(11, 3), e(12, 6)]),
        ];
        let merged = merge_buckets(&buckets);
        let seqs: Vec<u64> = merged.iter().map(|k| k.global_seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(merged[1].client, ClientId::new(3));
    }

    #[test]
    fn test_corrupt_bucket_is_storage_failure() {
        let store = Arc::new(MemoryStore::new());
        let ledger = TransactionOrderLedger::open(store.clone()).unwrap();
        store
            .put(CLIENT_LOCAL_LISTS, &ClientId::new(1).to_key(), &[0xFF])
            .unwrap();
        let err = ledger.index_for_replay(ClientId::new(1), tx(1)).unwrap_err();
        assert!(err.is_storage_failure());
    }
}
