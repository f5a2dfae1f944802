//! Connection table: one live connection per node alias
//!
//! Connections are opened eagerly, shard masters first, then the remaining
//! non-replica nodes, then replicas. A replica that cannot be reached is
//! served by a fresh connection to its master's address, stored under the
//! replica's alias. Every alias owns its own connection, even when two
//! aliases point at the same physical node.

use crate::client::{Connector, NodeConnection};
use crate::cluster::{NodeAddress, Topology};
use crate::error::{Result, RouterError};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Connection slot for one alias
pub struct NodeHandle<C> {
    alias: String,
    served_by: String,
    addr: NodeAddress,
    conn: Mutex<C>,
}

impl<C> NodeHandle<C> {
    /// Alias this slot is registered under
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Alias of the node actually behind the connection
    pub fn served_by(&self) -> &str {
        &self.served_by
    }

    /// Address the connection was opened against
    pub fn address(&self) -> &NodeAddress {
        &self.addr
    }

    /// True when a replica slot is served by its master
    pub fn is_failover(&self) -> bool {
        self.alias != self.served_by
    }

    /// Exclusive access to the connection for one request
    pub async fn lock(&self) -> MutexGuard<'_, C> {
        self.conn.lock().await
    }
}

/// Connection table keyed by node alias
pub struct ConnectionPool<C> {
    nodes: BTreeMap<String, NodeHandle<C>>,
}

impl<C: NodeConnection> ConnectionPool<C> {
    /// Connect every node of a topology.
    ///
    /// Fails with a configuration error for an invalid topology, and with a
    /// connection error when a node (and, for replicas, its master) cannot
    /// be reached within the connect timeout.
    pub async fn connect<K>(topology: &Topology, connector: &K) -> Result<Self>
    where
        K: Connector<Conn = C>,
    {
        topology.validate()?;

        let timeout = topology.connect_timeout();
        let mut nodes = BTreeMap::new();

        for alias in topology.connect_order() {
            let addr = topology
                .address(alias)
                .ok_or_else(|| RouterError::UnknownAlias(alias.to_string()))?;

            let failure = match open(connector, addr, topology.database, timeout).await {
                Ok(conn) => {
                    info!("Connected {} at {} (db {})", alias, addr, topology.database);
                    nodes.insert(
                        alias.to_string(),
                        NodeHandle {
                            alias: alias.to_string(),
                            served_by: alias.to_string(),
                            addr: addr.clone(),
                            conn: Mutex::new(conn),
                        },
                    );
                    continue;
                }
                Err(reason) => reason,
            };

            let Some(master) = topology.master_for(alias) else {
                return Err(RouterError::Connection {
                    alias: alias.to_string(),
                    addr: addr.to_string(),
                    reason: failure,
                });
            };
            let master_addr = topology
                .address(master)
                .ok_or_else(|| RouterError::UnknownAlias(master.to_string()))?;

            warn!(
                "Replica {} at {} unreachable ({}), falling back to master {} at {}",
                alias, addr, failure, master, master_addr
            );

            match open(connector, master_addr, topology.database, timeout).await {
                Ok(conn) => {
                    nodes.insert(
                        alias.to_string(),
                        NodeHandle {
                            alias: alias.to_string(),
                            served_by: master.to_string(),
                            addr: master_addr.clone(),
                            conn: Mutex::new(conn),
                        },
                    );
                }
                Err(master_failure) => {
                    return Err(RouterError::Connection {
                        alias: alias.to_string(),
                        addr: addr.to_string(),
                        reason: format!(
                            "{}; master {} at {} also unreachable: {}",
                            failure, master, master_addr, master_failure
                        ),
                    });
                }
            }
        }

        Ok(Self { nodes })
    }
}

impl<C> ConnectionPool<C> {
    /// Connection slot for an alias
    pub fn get(&self, alias: &str) -> Result<&NodeHandle<C>> {
        self.nodes
            .get(alias)
            .ok_or_else(|| RouterError::UnknownAlias(alias.to_string()))
    }

    /// All aliases in the table, sorted
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Number of replica slots served by their master
    pub fn failovers(&self) -> usize {
        self.nodes.values().filter(|n| n.is_failover()).count()
    }
}

/// Open a connection and select the database, bounded by `timeout`
pub(super) async fn open<K: Connector>(
    connector: &K,
    addr: &NodeAddress,
    db: i64,
    timeout: Duration,
) -> std::result::Result<K::Conn, String> {
    let attempt = async {
        let mut conn = connector.connect(addr).await?;
        conn.select_db(db).await?;
        Ok::<_, redis::RedisError>(conn)
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
    }
}
