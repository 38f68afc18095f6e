//! In-memory store, for tests and for nodes that run without durability

use super::{KeyValueStore, WriteBatch, WriteOp};
use crate::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Tables {
    namespaces: HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
    counters: HashMap<String, u64>,
}

/// Volatile [`KeyValueStore`]; contents are lost on drop
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read();
        Ok(tables
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<Vec<u8>>> {
        let tables = self.tables.read();
        Ok(tables
            .namespaces
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn counter(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.tables.read().counters.get(name).copied())
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        // A single write guard makes the whole batch visible at once
        let mut tables = self.tables.write();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { namespace, key, value } => {
                    tables.namespaces.entry(namespace).or_default().insert(key, value);
                }
                WriteOp::Remove { namespace, key } => {
                    if let Some(ns) = tables.namespaces.get_mut(&namespace) {
                        ns.remove(&key);
                    }
                }
                WriteOp::Clear { namespace } => {
                    tables.namespaces.remove(&namespace);
                }
                WriteOp::SetCounter { name, value } => {
                    tables.counters.insert(name, value);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::contract;

    #[test]
    fn test_put_get_remove() {
        contract::put_get_remove(&MemoryStore::new());
    }

    #[test]
    fn test_keys_are_sorted() {
        contract::keys_are_sorted(&MemoryStore::new());
    }

    #[test]
    fn test_counters() {
        contract::counters(&MemoryStore::new());
    }

    #[test]
    fn test_clear_namespace() {
        contract::clear_namespace(&MemoryStore::new());
    }
}
