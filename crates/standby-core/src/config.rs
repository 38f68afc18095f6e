//! Replication core configuration
//!
//! Loaded from TOML. Every section falls back to its defaults when omitted:
//!
//! ```toml
//! [ledger]
//! data_dir = "./data/ledger"
//!
//! [sync]
//! max_payload_chunk = 1048576
//!
//! [cluster]
//! this_server = "server-a"
//!
//! [[cluster.servers]]
//! name = "server-a"
//! host = "10.0.0.1"
//! port = 9410
//!
//! [[cluster.groups]]
//! name = "stripe-1"
//! members = ["server-a", "server-b"]
//! ```

use crate::sync::MAX_PAYLOAD_CHUNK;
use crate::topology::{ClusterConfigSource, GroupConfig, ServerBinding};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Bind address that means "every interface"
pub const WILDCARD_IP: &str = "0.0.0.0";

/// Default port for replication traffic
pub const DEFAULT_GROUP_PORT: u16 = 9430;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StandbyConfig {
    /// Transaction order ledger storage
    pub ledger: LedgerConfig,
    /// Passive synchronization
    pub sync: SyncConfig,
    /// Static cluster topology
    pub cluster: ClusterConfig,
}

/// Ledger storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding the LMDB environment
    pub data_dir: PathBuf,
    /// Maximum size of the LMDB memory map in bytes
    pub map_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            map_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Passive synchronization configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Largest payload carried by a single `PartitionPayload` unit
    pub max_payload_chunk: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_payload_chunk: 1024 * 1024, // 1MB chunks
        }
    }
}

/// One server entry of the cluster section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Server name, unique in the cluster
    pub name: String,
    /// Host the server is reachable on
    pub host: String,
    /// Address the group port binds to; the wildcard resolves to `host`
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Client-facing port; together with the host it forms the node name
    pub port: u16,
    /// Port used for server-to-server replication
    #[serde(default = "default_group_port")]
    pub group_port: u16,
}

fn default_bind() -> String {
    WILDCARD_IP.to_string()
}

fn default_group_port() -> u16 {
    DEFAULT_GROUP_PORT
}

/// Static cluster description
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Name of the server this process runs as
    pub this_server: String,
    /// Every known server
    pub servers: Vec<ServerConfig>,
    /// Mirror groups (active plus its passives)
    pub groups: Vec<GroupConfig>,
}

impl ClusterConfig {
    /// Look up a server entry by name
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    fn validate(&self) -> Result<()> {
        for (i, server) in self.servers.iter().enumerate() {
            if server.name.is_empty() {
                return Err(Error::config(format!("cluster.servers[{}] has no name", i)));
            }
            if self.servers[..i].iter().any(|s| s.name == server.name) {
                return Err(Error::config(format!("duplicate server name '{}'", server.name)));
            }
        }
        for group in &self.groups {
            if let Some(unknown) = group.members.iter().find(|m| self.server(m).is_none()) {
                return Err(Error::config(format!(
                    "group '{}' lists unknown server '{}'",
                    group.name, unknown
                )));
            }
        }
        if !self.this_server.is_empty() && !self.servers.is_empty() && self.server(&self.this_server).is_none() {
            return Err(Error::config(format!(
                "this_server '{}' is not listed in cluster.servers",
                self.this_server
            )));
        }
        Ok(())
    }
}

impl ClusterConfigSource for ClusterConfig {
    fn known_servers(&self) -> Result<Vec<String>> {
        Ok(self.servers.iter().map(|s| s.name.clone()).collect())
    }

    fn server_binding(&self, server_name: &str) -> Result<ServerBinding> {
        let server = self
            .server(server_name)
            .ok_or_else(|| Error::config(format!("no configuration for server '{}'", server_name)))?;
        Ok(ServerBinding {
            host: server.host.clone(),
            bind: server.bind.clone(),
            port: server.port,
        })
    }

    fn group_of(&self, server_name: &str) -> Option<GroupConfig> {
        self.groups
            .iter()
            .find(|g| g.members.iter().any(|m| m == server_name))
            .cloned()
    }

    fn this_group(&self) -> Option<GroupConfig> {
        self.group_of(&self.this_server)
    }
}

impl StandbyConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StandbyConfig =
            toml::from_str(content).map_err(|e| Error::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {:?}: {}", path, e)))?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded standby configuration from {:?}", path);
        Ok(config)
    }

    /// Set the ledger data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.ledger.data_dir = data_dir.into();
        self
    }

    /// Set the largest sync payload chunk
    pub fn with_max_payload_chunk(mut self, bytes: usize) -> Self {
        self.sync.max_payload_chunk = bytes;
        self
    }

    /// Set the cluster description
    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ledger.map_size == 0 {
            return Err(Error::config("ledger.map_size must be at least 1"));
        }
        if self.sync.max_payload_chunk == 0 {
            return Err(Error::config("sync.max_payload_chunk must be at least 1"));
        }
        if self.sync.max_payload_chunk > MAX_PAYLOAD_CHUNK {
            return Err(Error::config(format!(
                "sync.max_payload_chunk must be at most {} bytes",
                MAX_PAYLOAD_CHUNK
            )));
        }
        self.cluster.validate()
    }
}
