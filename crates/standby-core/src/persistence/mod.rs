//! Durable key-value persistence capability
//!
//! The ledger only needs a handful of primitives from its storage: keyed
//! values grouped into named namespaces, scalar counter cells, and a way to
//! apply several changes as one atomic unit. [`KeyValueStore`] captures
//! exactly that; [`MemoryStore`] and [`LmdbStore`] implement it.

mod lmdb;
mod memory;

pub use lmdb::LmdbStore;
pub use memory::MemoryStore;

use crate::Result;

/// One change inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite a value
    Put {
        /// Namespace name
        namespace: String,
        /// Key bytes
        key: Vec<u8>,
        /// Value bytes
        value: Vec<u8>,
    },
    /// Delete a key (absent keys are ignored)
    Remove {
        /// Namespace name
        namespace: String,
        /// Key bytes
        key: Vec<u8>,
    },
    /// Delete every key in a namespace
    Clear {
        /// Namespace name
        namespace: String,
    },
    /// Overwrite a counter cell
    SetCounter {
        /// Counter name
        name: String,
        /// New value
        value: u64,
    },
}

/// Ordered list of changes applied all-or-nothing by [`KeyValueStore::commit`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put
    pub fn put(mut self, namespace: &str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.ops.push(WriteOp::Put {
            namespace: namespace.to_string(),
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queue a removal
    pub fn remove(mut self, namespace: &str, key: impl Into<Vec<u8>>) -> Self {
        self.ops.push(WriteOp::Remove {
            namespace: namespace.to_string(),
            key: key.into(),
        });
        self
    }

    /// Queue a namespace clear
    pub fn clear(mut self, namespace: &str) -> Self {
        self.ops.push(WriteOp::Clear {
            namespace: namespace.to_string(),
        });
        self
    }

    /// Queue a counter update
    pub fn set_counter(mut self, name: &str, value: u64) -> Self {
        self.ops.push(WriteOp::SetCounter {
            name: name.to_string(),
            value,
        });
        self
    }

    /// Queued operations, in application order
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Persistence capability consumed by the ledger.
///
/// Every failure is reported as [`crate::Error::StorageFailure`]; stores never
/// retry internally.
pub trait KeyValueStore: Send + Sync {
    /// Read one value
    fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All keys of a namespace, in ascending byte order
    fn keys(&self, namespace: &str) -> Result<Vec<Vec<u8>>>;

    /// Read a counter cell; `None` if it was never set
    fn counter(&self, name: &str) -> Result<Option<u64>>;

    /// Apply a batch atomically
    fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// True if the key holds a value
    fn contains(&self, namespace: &str, key: &[u8]) -> Result<bool> {
        Ok(self.get(namespace, key)?.is_some())
    }

    /// Single-key put
    fn put(&self, namespace: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.commit(WriteBatch::new().put(namespace, key, value))
    }

    /// Single-key remove
    fn remove(&self, namespace: &str, key: &[u8]) -> Result<()> {
        self.commit(WriteBatch::new().remove(namespace, key))
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every [`KeyValueStore`] must share

    use super::*;

    pub fn put_get_remove(store: &dyn KeyValueStore) {
        assert_eq!(store.get("ns", b"k").unwrap(), None);
        store.put("ns", b"k", b"v1").unwrap();
        assert_eq!(store.get("ns", b"k").unwrap(), Some(b"v1".to_vec()));
        assert!(store.contains("ns", b"k").unwrap());
        assert_eq!(store.get("other", b"k").unwrap(), None);

        store.remove("ns", b"k").unwrap();
        assert_eq!(store.get("ns", b"k").unwrap(), None);
        // Removing twice is fine
        store.remove("ns", b"k").unwrap();
    }

    pub fn keys_are_sorted(store: &dyn KeyValueStore) {
        let batch = WriteBatch::new()
            .put("ns", vec![0, 3], b"c".to_vec())
            .put("ns", vec![0, 1], b"a".to_vec())
            .put("ns", vec![0, 2], b"b".to_vec())
            .put("elsewhere", vec![9], b"z".to_vec());
        store.commit(batch).unwrap();
        assert_eq!(store.keys("ns").unwrap(), vec![vec![0, 1], vec![0, 2], vec![0, 3]]);
        assert!(store.keys("never-written").unwrap().is_empty());
    }

    pub fn counters(store: &dyn KeyValueStore) {
        assert_eq!(store.counter("seq").unwrap(), None);
        store.commit(WriteBatch::new().set_counter("seq", 41)).unwrap();
        store.commit(WriteBatch::new().set_counter("seq", 42)).unwrap();
        assert_eq!(store.counter("seq").unwrap(), Some(42));
    }

    pub fn clear_namespace(store: &dyn KeyValueStore) {
        store.put("a", b"1", b"x").unwrap();
        store.put("a", b"2", b"x").unwrap();
        store.put("b", b"1", b"y").unwrap();
        store
            .commit(WriteBatch::new().clear("a").put("a", b"3", b"z"))
            .unwrap();
        assert_eq!(store.keys("a").unwrap(), vec![b"3".to_vec()]);
        assert_eq!(store.keys("b").unwrap(), vec![b"1".to_vec()]);
    }
}
