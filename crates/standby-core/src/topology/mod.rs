//! Cluster topology
//!
//! The registry owns the current member set of the cluster and tells
//! registered listeners about every membership delta. Member addresses are
//! resolved to server names through a [`ClusterConfigSource`].

mod registry;

pub use registry::TopologyRegistry;

use crate::Result;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

/// A cluster member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node {
    /// Configured server name
    pub server_name: String,
    /// Host the member is reachable on
    pub host: String,
    /// Client-facing port
    pub port: u16,
    /// Server-to-server port
    pub group_port: u16,
}

impl Node {
    /// Create a node
    pub fn new(server_name: impl Into<String>, host: impl Into<String>, port: u16, group_port: u16) -> Self {
        Self {
            server_name: server_name.into(),
            host: host.into(),
            port,
            group_port,
        }
    }

    /// Network name, `host:port`
    pub fn node_name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.server_name, self.host, self.port)
    }
}

/// A membership delta, as applied and as delivered to listeners
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyChange {
    /// Members joining
    pub added: BTreeSet<Node>,
    /// Members leaving; wins over `added` for a node in both
    pub removed: BTreeSet<Node>,
}

impl TopologyChange {
    /// Build a delta
    pub fn new(added: impl IntoIterator<Item = Node>, removed: impl IntoIterator<Item = Node>) -> Self {
        Self {
            added: added.into_iter().collect(),
            removed: removed.into_iter().collect(),
        }
    }

    /// True when the delta changes nothing
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Observer of membership deltas.
///
/// Called synchronously from [`TopologyRegistry::apply_delta`], so
/// implementations must not apply a delta themselves.
pub trait TopologyListener: Send + Sync {
    /// A delta was applied; an error is returned to the caller of `apply_delta`
    fn topology_changed(&self, change: &TopologyChange) -> Result<()>;
}

/// Network binding of one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBinding {
    /// Host name
    pub host: String,
    /// Bind address of the group port; the wildcard means `host`
    pub bind: String,
    /// Client-facing port
    pub port: u16,
}

/// A mirror group: one active plus its passives
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupConfig {
    /// Group name
    pub name: String,
    /// Server names in the group
    pub members: Vec<String>,
}

/// Source of static cluster configuration.
///
/// Failures should be reported as [`crate::Error::Config`].
pub trait ClusterConfigSource: Send + Sync {
    /// Every server name currently known
    fn known_servers(&self) -> Result<Vec<String>>;

    /// Binding of one server
    fn server_binding(&self, server_name: &str) -> Result<ServerBinding>;

    /// Group containing `server_name`
    fn group_of(&self, server_name: &str) -> Option<GroupConfig>;

    /// Group of the local server
    fn this_group(&self) -> Option<GroupConfig>;
}
