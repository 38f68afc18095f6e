//! LMDB-backed store
//!
//! One LMDB environment holds two databases:
//! - `entries`: every namespace, keyed by `namespace \0 key`
//! - `counters`: counter name → big-endian u64
//!
//! A [`WriteBatch`] maps onto a single LMDB write transaction, so a batch is
//! either fully durable or not applied at all.

use super::{KeyValueStore, WriteBatch, WriteOp};
use crate::config::LedgerConfig;
use crate::{Error, Result};
use heed::byteorder::BigEndian;
use heed::types::{Bytes, Str, U64};
use heed::{Database, Env, EnvOpenOptions};
use std::path::{Path, PathBuf};

const ENTRIES_DB: &str = "entries";
const COUNTERS_DB: &str = "counters";
const NAMESPACE_SEPARATOR: u8 = 0;

/// Durable [`KeyValueStore`] on top of heed
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    entries: Database<Bytes, Bytes>,
    counters: Database<Str, U64<BigEndian>>,
    path: PathBuf,
}

impl LmdbStore {
    /// Open (or create) the store configured for the ledger
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        Self::open_at(&config.data_dir, config.map_size)
    }

    /// Open (or create) a store at `path` with the given LMDB map size
    pub fn open_at(path: impl AsRef<Path>, map_size: usize) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)
            .map_err(|e| Error::storage(format!("cannot create {:?}: {}", path, e)))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(2)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let entries = env.create_database(&mut wtxn, Some(ENTRIES_DB))?;
        let counters = env.create_database(&mut wtxn, Some(COUNTERS_DB))?;
        wtxn.commit()?;

        tracing::debug!("Opened LMDB store at {:?} (map size {} bytes)", path, map_size);

        Ok(Self {
            env,
            entries,
            counters,
            path: path.to_path_buf(),
        })
    }

    /// Directory holding the environment
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the environment to disk
    pub fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

fn namespace_prefix(namespace: &str) -> Result<Vec<u8>> {
    if namespace.as_bytes().contains(&NAMESPACE_SEPARATOR) {
        return Err(Error::invalid_argument(format!(
            "namespace {:?} contains a NUL byte",
            namespace
        )));
    }
    let mut prefix = Vec::with_capacity(namespace.len() + 1);
    prefix.extend_from_slice(namespace.as_bytes());
    prefix.push(NAMESPACE_SEPARATOR);
    Ok(prefix)
}

fn composite_key(namespace: &str, key: &[u8]) -> Result<Vec<u8>> {
    let mut composite = namespace_prefix(namespace)?;
    composite.extend_from_slice(key);
    Ok(composite)
}

impl KeyValueStore for LmdbStore {
    fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let composite = composite_key(namespace, key)?;
        let rtxn = self.env.read_txn()?;
        Ok(self.entries.get(&rtxn, &composite)?.map(|v| v.to_vec()))
    }

    fn keys(&self, namespace: &str) -> Result<Vec<Vec<u8>>> {
        let prefix = namespace_prefix(namespace)?;
        let rtxn = self.env.read_txn()?;
        let mut keys = Vec::new();
        for item in self.entries.prefix_iter(&rtxn, &prefix)? {
            let (key, _) = item?;
            keys.push(key[prefix.len()..].to_vec());
        }
        Ok(keys)
    }

    fn counter(&self, name: &str) -> Result<Option<u64>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.counters.get(&rtxn, name)?)
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { namespace, key, value } => {
                    let composite = composite_key(&namespace, &key)?;
                    self.entries.put(&mut wtxn, &composite, &value)?;
                }
                WriteOp::Remove { namespace, key } => {
                    let composite = composite_key(&namespace, &key)?;
                    self.entries.delete(&mut wtxn, &composite)?;
                }
                WriteOp::Clear { namespace } => {
                    let prefix = namespace_prefix(&namespace)?;
                    let mut doomed = Vec::new();
                    for item in self.entries.prefix_iter(&wtxn, &prefix)? {
                        let (key, _) = item?;
                        doomed.push(key.to_vec());
                    }
                    for key in doomed {
                        self.entries.delete(&mut wtxn, &key)?;
                    }
                }
                WriteOp::SetCounter { name, value } => {
                    self.counters.put(&mut wtxn, name.as_str(), &value)?;
                }
            }
        }
        // Dropping the transaction on an early return aborts the whole batch
        wtxn.commit()?;
        Ok(())
    }
}
