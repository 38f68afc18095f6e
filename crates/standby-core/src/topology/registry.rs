//! Topology registry
//!
//! The current view (members, this-group server names, node-name lookup) is
//! an immutable snapshot behind an `RwLock<Arc<_>>`. A delta builds the next
//! snapshot completely before swapping it in, so readers never see a partial
//! delta. Deltas are serialized by a separate mutex so listeners observe them
//! in the order they were applied.

use super::{ClusterConfigSource, Node, TopologyChange, TopologyListener};
use crate::config::{ClusterConfig, WILDCARD_IP};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
struct TopologyView {
    members: BTreeSet<Node>,
    this_group: BTreeSet<String>,
    node_to_server: HashMap<String, String>,
}

/// Owner of the cluster member set
pub struct TopologyRegistry {
    view: RwLock<Arc<TopologyView>>,
    apply_lock: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn TopologyListener>>>,
    config: Option<Arc<dyn ClusterConfigSource>>,
}

impl TopologyRegistry {
    /// Create a registry with an initial member set.
    ///
    /// `this_group` holds the server names of the local mirror group. The
    /// node-name lookup is derived from `config` right away.
    pub fn new(
        initial: impl IntoIterator<Item = Node>,
        this_group: impl IntoIterator<Item = String>,
        config: Option<Arc<dyn ClusterConfigSource>>,
    ) -> Result<Self> {
        let node_to_server = match &config {
            Some(source) => resolve_node_names(source.as_ref())?,
            None => HashMap::new(),
        };
        let view = TopologyView {
            members: initial.into_iter().collect(),
            this_group: this_group.into_iter().collect(),
            node_to_server,
        };
        tracing::debug!(
            "Topology registry created with {} members ({} in this group)",
            view.members.len(),
            view.this_group.len()
        );
        Ok(Self {
            view: RwLock::new(Arc::new(view)),
            apply_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            config,
        })
    }

    /// Registry over a fixed member set, with no configuration source
    pub fn for_members(initial: impl IntoIterator<Item = Node>) -> Self {
        Self {
            view: RwLock::new(Arc::new(TopologyView {
                members: initial.into_iter().collect(),
                ..TopologyView::default()
            })),
            apply_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            config: None,
        }
    }

    /// Registry seeded from the static cluster section: members are the
    /// servers of this server's group (every server if no group lists it)
    pub fn from_cluster(cluster: ClusterConfig) -> Result<Self> {
        let group = cluster.this_group();
        let members: Vec<Node> = cluster
            .servers
            .iter()
            .filter(|s| group.as_ref().is_none_or(|g| g.members.contains(&s.name)))
            .map(|s| Node::new(s.name.clone(), s.host.clone(), s.port, s.group_port))
            .collect();
        let this_group = group.map(|g| g.members).unwrap_or_default();
        Self::new(members, this_group, Some(Arc::new(cluster)))
    }

    /// Ordered snapshot of the member set
    pub fn all_members(&self) -> Result<Vec<Node>> {
        let view = self.snapshot();
        if view.members.is_empty() {
            return Err(Error::invariant("topology has no members"));
        }
        Ok(view.members.iter().cloned().collect())
    }

    /// Number of members
    pub fn member_count(&self) -> usize {
        self.snapshot().members.len()
    }

    /// Apply a membership delta: add, then remove, then notify listeners in
    /// registration order.
    ///
    /// A listener error stops notification and is returned; the delta stays
    /// applied.
    pub fn apply_delta(
        &self,
        added: impl IntoIterator<Item = Node>,
        removed: impl IntoIterator<Item = Node>,
    ) -> Result<()> {
        let change = TopologyChange::new(added, removed);
        let _guard = self.apply_lock.lock();

        let current = self.snapshot();
        let mut members = current.members.clone();
        let mut this_group = current.this_group.clone();
        for node in &change.added {
            members.insert(node.clone());
            this_group.insert(node.server_name.clone());
        }
        for node in &change.removed {
            members.remove(node);
            this_group.remove(&node.server_name);
        }
        let node_to_server = match &self.config {
            Some(source) => resolve_node_names(source.as_ref())?,
            None => current.node_to_server.clone(),
        };

        if members.is_empty() {
            tracing::warn!("Topology delta left the member set empty");
        }
        tracing::info!(
            "Topology changed: +{} -{} ({} members)",
            change.added.len(),
            change.removed.len(),
            members.len()
        );

        *self.view.write() = Arc::new(TopologyView {
            members,
            this_group,
            node_to_server,
        });

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.topology_changed(&change)?;
        }
        Ok(())
    }

    /// Add a listener for every later delta
    pub fn register_listener(&self, listener: Arc<dyn TopologyListener>) {
        self.listeners.write().push(listener);
    }

    /// True if `name` is the server name or node name of a current member
    pub fn is_member(&self, name: &str) -> bool {
        self.snapshot()
            .members
            .iter()
            .any(|n| n.server_name == name || n.node_name() == name)
    }

    /// True if `server_name` belongs to the local mirror group
    pub fn is_member_of_this_group(&self, server_name: &str) -> bool {
        self.snapshot().this_group.contains(server_name)
    }

    /// Server name configured for `node_name` (`host:port`)
    pub fn server_name_for(&self, node_name: &str) -> Option<String> {
        self.snapshot().node_to_server.get(node_name).cloned()
    }

    /// Name of the group `node_name` belongs to; `None` without configuration
    pub fn group_name_for(&self, node_name: &str) -> Option<String> {
        let config = self.config.as_ref()?;
        let server_name = self.server_name_for(node_name)?;
        config.group_of(&server_name).map(|g| g.name)
    }

    fn snapshot(&self) -> Arc<TopologyView> {
        self.view.read().clone()
    }
}

/// Map `host:port` to server name for every known server; a wildcard bind
/// address stands for the server's host
fn resolve_node_names(source: &dyn ClusterConfigSource) -> Result<HashMap<String, String>> {
    let mut lookup = HashMap::new();
    for server_name in source.known_servers().map_err(as_config_error)? {
        let binding = source.server_binding(&server_name).map_err(as_config_error)?;
        let host = if binding.bind == WILDCARD_IP {
            binding.host
        } else {
            binding.bind
        };
        lookup.insert(format!("{}:{}", host, binding.port), server_name);
    }
    Ok(lookup)
}

fn as_config_error(err: Error) -> Error {
    match err {
        Error::Config(_) => err,
        other => Error::config(other.to_string()),
    }
}
