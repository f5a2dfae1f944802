//! Static cluster topology
//!
//! A topology names every node by alias, pairs each shard master with the
//! replica that serves its reads, and designates a default node for
//! commands without key affinity. Shard masters are expected to be named
//! `node_1` .. `node_N`, where `N` is the number of master/replica pairs.

use crate::error::{Result, RouterError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Connect timeout used when none is configured (3 seconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Prefix of shard master aliases
pub const SHARD_ALIAS_PREFIX: &str = "node_";

/// Alias of the master that owns a 1-based shard index
pub fn shard_alias(shard: usize) -> String {
    format!("{}{}", SHARD_ALIAS_PREFIX, shard)
}

/// Host and port of one store instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses `host:port`; IPv6 hosts may be written as `[::1]:6379`
impl FromStr for NodeAddress {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RouterError::Config(format!("address '{}' is not host:port", s));

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Cluster description supplied at construction time
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Topology {
    /// Every configured node by alias
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeAddress>,

    /// Shard master alias -> alias of the replica serving its reads
    #[serde(default)]
    pub master_of: BTreeMap<String, String>,

    /// Alias that receives unhashed commands
    #[serde(default)]
    pub default_node: String,

    /// Logical database selected on every connection
    #[serde(default)]
    pub database: i64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            master_of: BTreeMap::new(),
            default_node: String::new(),
            database: 0,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl Topology {
    /// Create an empty topology; fill it with the `with_*` methods
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    pub fn with_node(mut self, alias: impl Into<String>, addr: NodeAddress) -> Self {
        self.nodes.insert(alias.into(), addr);
        self
    }

    /// Pair a shard master with the replica serving its reads
    pub fn with_replica(mut self, master: impl Into<String>, replica: impl Into<String>) -> Self {
        self.master_of.insert(master.into(), replica.into());
        self
    }

    /// Set the node receiving unhashed commands
    pub fn with_default_node(mut self, alias: impl Into<String>) -> Self {
        self.default_node = alias.into();
        self
    }

    /// Set the logical database selected on every connection
    pub fn with_database(mut self, db: i64) -> Self {
        self.database = db;
        self
    }

    /// Set the per-node connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Parse a topology from TOML and validate it
    ///
    /// # Example
    ///
    /// ```
    /// use shardkv::cluster::Topology;
    ///
    /// let topology = Topology::from_toml_str(r#"
    ///     default_node = "node_1"
    ///
    ///     [nodes]
    ///     node_1 = { host = "127.0.0.1", port = 6379 }
    ///     node_2 = { host = "127.0.0.1", port = 6380 }
    ///
    ///     [master_of]
    ///     node_1 = "node_2"
    /// "#).unwrap();
    /// assert_eq!(topology.shard_count(), 1);
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let topology: Topology = toml::from_str(content)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Read, parse and validate a topology file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check the invariants the router relies on
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(RouterError::Config("no nodes configured".to_string()));
        }
        if self.master_of.is_empty() {
            return Err(RouterError::Config(
                "no master/replica pairs configured".to_string(),
            ));
        }
        if !self.nodes.contains_key(&self.default_node) {
            return Err(RouterError::Config(format!(
                "default node '{}' is not a configured node",
                self.default_node
            )));
        }
        for (master, replica) in &self.master_of {
            for alias in [master, replica] {
                if !self.nodes.contains_key(alias) {
                    return Err(RouterError::Config(format!(
                        "replication pair {} -> {} names unknown node '{}'",
                        master, replica, alias
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of shards, one per master/replica pair
    pub fn shard_count(&self) -> usize {
        self.master_of.len()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn address(&self, alias: &str) -> Option<&NodeAddress> {
        self.nodes.get(alias)
    }

    /// Replica alias serving reads for a shard master
    pub fn replica_of(&self, master: &str) -> Option<&str> {
        self.master_of.get(master).map(String::as_str)
    }

    /// Master alias a replica falls back to
    pub fn master_for(&self, replica: &str) -> Option<&str> {
        self.master_of
            .iter()
            .find(|(_, r)| r.as_str() == replica)
            .map(|(m, _)| m.as_str())
    }

    pub fn is_master(&self, alias: &str) -> bool {
        self.master_of.contains_key(alias)
    }

    pub fn is_replica(&self, alias: &str) -> bool {
        self.master_for(alias).is_some()
    }

    /// Node aliases in connection order: shard masters, then nodes that are
    /// neither master nor replica, then replicas.
    pub fn connect_order(&self) -> Vec<&str> {
        let mut masters = Vec::new();
        let mut others = Vec::new();
        let mut replicas = Vec::new();

        for alias in self.nodes.keys() {
            if self.is_master(alias) {
                masters.push(alias.as_str());
            } else if self.is_replica(alias) {
                replicas.push(alias.as_str());
            } else {
                others.push(alias.as_str());
            }
        }

        masters.extend(others);
        masters.extend(replicas);
        masters
    }
}
