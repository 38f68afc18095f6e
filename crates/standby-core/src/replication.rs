//! Replication core facade
//!
//! Wires the ledger, the topology registry and sync attempts together from a
//! single [`StandbyConfig`].

use crate::config::StandbyConfig;
use crate::ledger::TransactionOrderLedger;
use crate::persistence::{KeyValueStore, LmdbStore};
use crate::sync::{ActiveSyncSender, PassiveSyncReceiver, SyncSink};
use crate::topology::{Node, TopologyChange, TopologyListener, TopologyRegistry};
use crate::Result;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Members that still need a full synchronization.
///
/// Joining members are added, leaving members dropped; the local server is
/// never a target.
pub struct SyncTargets {
    this_server: String,
    pending: Mutex<BTreeSet<String>>,
}

impl SyncTargets {
    /// Start with every member except `this_server` pending
    pub fn new<'a>(this_server: impl Into<String>, members: impl IntoIterator<Item = &'a Node>) -> Self {
        let this_server = this_server.into();
        let pending = members
            .into_iter()
            .filter(|n| n.server_name != this_server)
            .map(|n| n.server_name.clone())
            .collect();
        Self {
            this_server,
            pending: Mutex::new(pending),
        }
    }

    /// Server names awaiting synchronization, sorted
    pub fn pending(&self) -> Vec<String> {
        self.pending.lock().iter().cloned().collect()
    }

    /// True if `server_name` awaits synchronization
    pub fn needs_sync(&self, server_name: &str) -> bool {
        self.pending.lock().contains(server_name)
    }

    /// Record a completed synchronization; false if it was not pending
    pub fn mark_synced(&self, server_name: &str) -> bool {
        let removed = self.pending.lock().remove(server_name);
        if removed {
            tracing::info!("Passive {} is synchronized", server_name);
        }
        removed
    }
}

impl TopologyListener for SyncTargets {
    fn topology_changed(&self, change: &TopologyChange) -> Result<()> {
        let mut pending = self.pending.lock();
        for node in &change.added {
            if node.server_name != self.this_server {
                pending.insert(node.server_name.clone());
            }
        }
        for node in &change.removed {
            pending.remove(&node.server_name);
        }
        tracing::debug!("{} members awaiting synchronization", pending.len());
        Ok(())
    }
}

/// Ledger, topology and sync attempts for one server
pub struct ReplicationCore {
    config: StandbyConfig,
    ledger: Arc<TransactionOrderLedger>,
    topology: Arc<TopologyRegistry>,
    sync_targets: Arc<SyncTargets>,
}

impl ReplicationCore {
    /// Open with the durable LMDB ledger at `config.ledger.data_dir`
    pub fn open(config: StandbyConfig) -> Result<Self> {
        config.validate()?;
        let store = LmdbStore::open(&config.ledger)?;
        Self::with_store(config, Arc::new(store))
    }

    /// Open over any store
    pub fn with_store(config: StandbyConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(TransactionOrderLedger::open(store)?);
        let topology = Arc::new(TopologyRegistry::from_cluster(config.cluster.clone())?);

        let members = if topology.member_count() == 0 {
            tracing::warn!(
                "Cluster configuration for '{}' lists no members; no passive awaits synchronization",
                config.cluster.this_server
            );
            Vec::new()
        } else {
            topology.all_members()?
        };
        let sync_targets = Arc::new(SyncTargets::new(config.cluster.this_server.clone(), &members));
        topology.register_listener(sync_targets.clone());

        tracing::info!(
            "Replication core ready for '{}' ({} members)",
            config.cluster.this_server,
            members.len()
        );

        Ok(Self {
            config,
            ledger,
            topology,
            sync_targets,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &StandbyConfig {
        &self.config
    }

    /// Transaction order ledger
    pub fn ledger(&self) -> &Arc<TransactionOrderLedger> {
        &self.ledger
    }

    /// Topology registry
    pub fn topology(&self) -> &Arc<TopologyRegistry> {
        &self.topology
    }

    /// Members still needing a full synchronization
    pub fn sync_targets(&self) -> &Arc<SyncTargets> {
        &self.sync_targets
    }

    /// Start a new active-side attempt
    pub fn start_sync(&self) -> ActiveSyncSender {
        ActiveSyncSender::new(self.config.sync.clone())
    }

    /// Start a new passive-side attempt feeding `sink`
    pub fn passive_receiver<S: SyncSink>(&self, sink: S) -> PassiveSyncReceiver<S> {
        PassiveSyncReceiver::new(sink)
    }
}
