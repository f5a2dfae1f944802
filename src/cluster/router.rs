//! Command router
//!
//! The router is the single dispatch point. For every call it:
//!
//! 1. takes the hash key from the first argument, honouring key tags
//! 2. maps the key to a 1-based shard with [`shard_for_key`]
//! 3. picks the target alias by command class: writes go to the shard
//!    master `node_<shard>`, reads to that master's replica, everything else
//!    to the default node
//! 4. forwards the operation unchanged to the target's connection
//!
//! Replies and store errors come back untouched.

use super::pool::{ConnectionPool, NodeHandle};
use super::shard::shard_for_key;
use super::topology::{shard_alias, Topology};
use crate::client::{Arg, Connector, NodeConnection, RedisConnection, RedisConnector};
use crate::command::{self, CommandClass};
use crate::error::{Result, RouterError};
use crate::observability::RouterMetrics;
use redis::Value;
use std::time::Instant;
use tracing::debug;

/// Where a call goes, and with which arguments
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub class: CommandClass,
    /// 1-based shard, `None` for unhashed commands
    pub shard: Option<usize>,
    /// Target alias in the connection table
    pub alias: String,
    /// Arguments to forward, with any key tag removed
    pub args: Vec<Arg>,
}

/// Compute the routing decision for a call against a topology.
///
/// Does not touch any connection. The topology is validated first, so an
/// unusable topology (for example one without master/replica pairs) is
/// reported as a configuration error.
///
/// # Example
///
/// ```
/// use shardkv::client::Arg;
/// use shardkv::cluster::{route, NodeAddress, Topology};
///
/// let topology = Topology::new()
///     .with_node("node_1", NodeAddress::new("127.0.0.1", 6379))
///     .with_node("node_2", NodeAddress::new("127.0.0.1", 6380))
///     .with_replica("node_1", "node_2")
///     .with_default_node("node_1");
///
/// let write = route(&topology, "set", vec![Arg::from("foo"), Arg::from("bar")]).unwrap();
/// assert_eq!(write.alias, "node_1");
///
/// let read = route(&topology, "get", vec![Arg::from("foo")]).unwrap();
/// assert_eq!(read.alias, "node_2");
/// ```
pub fn route(topology: &Topology, op: &str, args: Vec<Arg>) -> Result<RouteDecision> {
    topology.validate()?;
    decide(topology, op, args)
}

/// Routing decision against a topology known to be valid
fn decide(topology: &Topology, op: &str, mut args: Vec<Arg>) -> Result<RouteDecision> {
    let hash_key = take_hash_key(&mut args);
    let class = command::classify(op);

    if !class.is_hashed() {
        return Ok(RouteDecision {
            class,
            shard: None,
            alias: topology.default_node.clone(),
            args,
        });
    }

    // shard_count() > 0 holds for a validated topology
    let shard = shard_for_key(&hash_key, topology.shard_count());
    let master = shard_alias(shard);
    let alias = match class {
        CommandClass::Write => master,
        _ => topology
            .replica_of(&master)
            .map(str::to_string)
            .ok_or(RouterError::UnknownAlias(master))?,
    };

    Ok(RouteDecision {
        class,
        shard: Some(shard),
        alias,
        args,
    })
}

/// Hash key of a call. A tagged first argument contributes its tag and is
/// replaced by the real argument it wraps.
fn take_hash_key(args: &mut [Arg]) -> Vec<u8> {
    let Some(first) = args.first_mut() else {
        return Vec::new();
    };

    let key = first.hash_bytes().into_owned();
    let owned = std::mem::replace(first, Arg::Int(0));
    *first = match owned.into_tag() {
        Ok((_, real)) => real,
        Err(plain) => plain,
    };
    key
}

/// Sharding router over a fixed connection table
pub struct Router<C> {
    topology: Topology,
    pool: ConnectionPool<C>,
    metrics: RouterMetrics,
}

impl Router<RedisConnection> {
    /// Connect to every node of the topology with the `redis` client
    pub async fn open(topology: Topology) -> Result<Self> {
        Self::connect(topology, &RedisConnector::new()).await
    }
}

impl<C: NodeConnection> Router<C> {
    /// Connect to every node of the topology with a custom connector
    pub async fn connect<K>(topology: Topology, connector: &K) -> Result<Self>
    where
        K: Connector<Conn = C>,
    {
        let pool = ConnectionPool::connect(&topology, connector).await?;
        let metrics = RouterMetrics::with_aliases(pool.aliases());
        metrics.failovers.inc_by(pool.failovers() as u64);

        Ok(Self {
            topology,
            pool,
            metrics,
        })
    }

    /// Routing decision for a call, without dispatching it
    pub fn route(&self, op: &str, args: Vec<Arg>) -> Result<RouteDecision> {
        decide(&self.topology, op, args)
    }

    /// Route a call and run it on the selected node
    pub async fn invoke(&self, op: &str, args: Vec<Arg>) -> Result<Value> {
        let decision = self.route(op, args)?;
        let node = self.pool.get(&decision.alias)?;

        debug!(
            "Routing {} ({}) shard={:?} to {} via {}",
            op,
            decision.class,
            decision.shard,
            decision.alias,
            node.served_by()
        );

        let started = Instant::now();
        let result = {
            let mut conn = node.lock().await;
            conn.call(op, &decision.args).await
        };
        self.metrics
            .record_call(decision.class, &decision.alias, started.elapsed());

        result.map_err(|e| {
            self.metrics.record_upstream_error();
            RouterError::Upstream(e)
        })
    }

    /// Direct access to one node's connection, bypassing routing
    pub fn connection_for(&self, alias: &str) -> Result<&NodeHandle<C>> {
        self.pool.get(alias)
    }
}

impl<C> Router<C> {
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// Aliases in the connection table
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.pool.aliases()
    }
}
