//! Key migration into a sharded topology
//!
//! Keys held by standalone source servers are copied to the shard master
//! that owns them under the router's numbering, `node_<(crc32(key) mod N) + 1>`,
//! so a migrated key is found by the router afterwards. Replicas are left to
//! the store's own replication.
//!
//! Migration runs in bounded batches. Every run walks each source database
//! with `SCAN`, copies about `limit` keys, and keeps the scan cursor on the
//! source under `rsk:cursor`. The next run resumes from there, which lets a
//! periodic job move a large keyspace piece by piece. A finished source
//! database is marked with `rsk:done`. Keys under the `rsk:` prefix belong to
//! the migration and are never copied.
//!
//! A run holds `rsk:run` on the first source (first database) while it works.
//! A crashed run leaves that key behind; delete it by hand before retrying.
//!
//! Strings, hashes, lists, sets and sorted sets are copied. Collections
//! replace any value the target already holds under the same key, and a
//! remaining time to live is carried over in seconds.

use super::pool::open;
use super::shard::shard_for_key;
use super::topology::{shard_alias, NodeAddress, Topology};
use crate::client::{Arg, Connector, NodeConnection};
use crate::error::{Result, RouterError};
use redis::{from_redis_value, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Prefix of the keys a migration keeps on its sources
pub const STATE_PREFIX: &str = "rsk:";

const RUN_KEY: &str = "rsk:run";
const FIRST_RUN_KEY: &str = "rsk:firstrun";
const CURSOR_KEY: &str = "rsk:cursor";
const DONE_KEY: &str = "rsk:done";

/// Keys scanned per source database and run when no limit is given
pub const DEFAULT_RESHARD_LIMIT: usize = 10_000;

/// What a migration run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshardOptions {
    /// Databases migrated on every source, each into the same database on
    /// the targets
    pub databases: Vec<i64>,
    /// Keys scanned per source database in one run
    pub limit: usize,
    /// Flush the target databases before the first run copies anything
    pub flush_targets: bool,
}

impl Default for ReshardOptions {
    fn default() -> Self {
        Self {
            databases: vec![0],
            limit: DEFAULT_RESHARD_LIMIT,
            flush_targets: false,
        }
    }
}

impl ReshardOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_databases(mut self, databases: impl IntoIterator<Item = i64>) -> Self {
        self.databases = databases.into_iter().collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_flush_targets(mut self, flush: bool) -> Self {
        self.flush_targets = flush;
        self
    }
}

/// Outcome of one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReshardReport {
    /// Keys copied in this run
    pub moved: u64,
    /// Keys that vanished while scanning or hold an unsupported type
    pub skipped: u64,
    /// Keys copied per target alias
    pub moved_to: BTreeMap<String, u64>,
    /// Source databases with keys left for a later run
    pub pending: usize,
}

impl ReshardReport {
    /// True once every source database has been fully scanned
    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }

    fn record(&mut self, alias: String) {
        self.moved += 1;
        *self.moved_to.entry(alias).or_insert(0) += 1;
    }
}

/// Copies keys from standalone servers onto the shard masters of a topology
#[derive(Debug, Clone)]
pub struct Resharder {
    topology: Topology,
    sources: Vec<NodeAddress>,
    options: ReshardOptions,
}

impl Resharder {
    /// Check the topology and options for a migration
    pub fn new(
        topology: Topology,
        sources: Vec<NodeAddress>,
        options: ReshardOptions,
    ) -> Result<Self> {
        topology.validate()?;
        if sources.is_empty() {
            return Err(RouterError::Config("no source servers to reshard".to_string()));
        }
        if options.databases.is_empty() {
            return Err(RouterError::Config("no databases to reshard".to_string()));
        }
        if options.limit == 0 {
            return Err(RouterError::Config("reshard limit must be positive".to_string()));
        }

        Ok(Self {
            topology,
            sources,
            options,
        })
    }

    /// Shard master alias a key is migrated to
    pub fn target_for(&self, key: &[u8]) -> String {
        shard_alias(shard_for_key(key, self.topology.shard_count()))
    }

    /// Run one batch over every source database
    pub async fn run<K: Connector>(&self, connector: &K) -> Result<ReshardReport> {
        let lock_source = &self.sources[0];
        let lock_db = self.options.databases[0];
        let mut control = self.connect(connector, "source", lock_source, lock_db).await?;

        let acquired = control
            .call("set", &[Arg::from(RUN_KEY), Arg::from(1), Arg::from("NX")])
            .await?;
        if acquired == Value::Nil {
            return Err(RouterError::Reshard(format!(
                "another run holds {} on {} (db {})",
                RUN_KEY, lock_source, lock_db
            )));
        }

        let result = self.run_locked(connector, &mut control).await;
        let released = control.call("del", &[Arg::from(RUN_KEY)]).await;
        let report = result?;
        released?;

        info!(
            "Resharding run moved {} keys, skipped {}, {} source databases pending",
            report.moved, report.skipped, report.pending
        );
        Ok(report)
    }

    async fn run_locked<K: Connector>(
        &self,
        connector: &K,
        control: &mut K::Conn,
    ) -> Result<ReshardReport> {
        if self.options.flush_targets {
            let first_run = control.call("get", &[Arg::from(FIRST_RUN_KEY)]).await?;
            if first_run == Value::Nil {
                self.flush_targets(connector).await?;
                control
                    .call("set", &[Arg::from(FIRST_RUN_KEY), Arg::from(1)])
                    .await?;
            }
        }

        let mut report = ReshardReport::default();
        for &db in &self.options.databases {
            let mut targets = self.connect_targets(connector, db).await?;
            for source in &self.sources {
                let mut conn = self.connect(connector, "source", source, db).await?;
                let name = format!("{} (db {})", source, db);
                if !self
                    .reshard_source(&mut conn, &mut targets, &name, &mut report)
                    .await?
                {
                    report.pending += 1;
                }
            }
        }
        Ok(report)
    }

    /// Copy the next batch of one source database. Returns true when the
    /// source database has been scanned to the end.
    async fn reshard_source<C: NodeConnection>(
        &self,
        source: &mut C,
        targets: &mut BTreeMap<String, C>,
        name: &str,
        report: &mut ReshardReport,
    ) -> Result<bool> {
        if source.call("get", &[Arg::from(DONE_KEY)]).await? != Value::Nil {
            info!("All keys of {} already resharded", name);
            return Ok(true);
        }

        let mut cursor = match source.call("get", &[Arg::from(CURSOR_KEY)]).await? {
            Value::Nil => 0,
            saved => from_redis_value::<u64>(&saved)?,
        };
        info!("Resharding {} from cursor {}", name, cursor);

        let mut scanned = 0;
        loop {
            let reply = source
                .call(
                    "scan",
                    &[
                        Arg::from(cursor.to_string()),
                        Arg::from("COUNT"),
                        Arg::Int(self.options.limit as i64),
                    ],
                )
                .await?;
            let (next, keys): (u64, Vec<Vec<u8>>) = from_redis_value(&reply)?;

            for key in keys {
                scanned += 1;
                if key.starts_with(STATE_PREFIX.as_bytes()) {
                    continue;
                }
                match self.copy_key(source, targets, &key).await? {
                    Some(alias) => report.record(alias),
                    None => report.skipped += 1,
                }
            }

            cursor = next;
            if cursor == 0 {
                source
                    .call("set", &[Arg::from(DONE_KEY), Arg::from(1)])
                    .await?;
                source.call("del", &[Arg::from(CURSOR_KEY)]).await?;
                info!("Finished resharding {}", name);
                return Ok(true);
            }
            if scanned >= self.options.limit {
                source
                    .call("set", &[Arg::from(CURSOR_KEY), Arg::from(cursor.to_string())])
                    .await?;
                info!("Resharded {} keys of {}, resuming at cursor {}", scanned, name, cursor);
                return Ok(false);
            }
        }
    }

    /// Copy one key to its shard master. Returns the target alias, or `None`
    /// when the key was skipped.
    async fn copy_key<C: NodeConnection>(
        &self,
        source: &mut C,
        targets: &mut BTreeMap<String, C>,
        key: &[u8],
    ) -> Result<Option<String>> {
        let kind: String = from_redis_value(&source.call("type", &[key_arg(key)]).await?)?;
        let alias = self.target_for(key);
        let target = targets
            .get_mut(&alias)
            .ok_or_else(|| RouterError::UnknownAlias(alias.clone()))?;

        let copied = match kind.as_str() {
            "string" => {
                let value = source.call("get", &[key_arg(key)]).await?;
                if value == Value::Nil {
                    false
                } else {
                    let value: Vec<u8> = from_redis_value(&value)?;
                    target
                        .call("set", &[key_arg(key), Arg::Bytes(value)])
                        .await?;
                    true
                }
            }
            "hash" => {
                let fields = fetch(source, "hgetall", key, &[]).await?;
                replace(target, "hmset", key, fields).await?
            }
            "list" => {
                let items = fetch(source, "lrange", key, &[Arg::Int(0), Arg::Int(-1)]).await?;
                replace(target, "rpush", key, items).await?
            }
            "set" => {
                let members = fetch(source, "smembers", key, &[]).await?;
                replace(target, "sadd", key, members).await?
            }
            "zset" => {
                let extra = [Arg::Int(0), Arg::Int(-1), Arg::from("WITHSCORES")];
                let pairs = fetch(source, "zrange", key, &extra).await?;
                // member, score -> score, member
                let entries = pairs
                    .chunks_exact(2)
                    .flat_map(|pair| [pair[1].clone(), pair[0].clone()])
                    .collect();
                replace(target, "zadd", key, entries).await?
            }
            _ => false,
        };

        if !copied {
            debug!("Skipping {} key {:?}", kind, String::from_utf8_lossy(key));
            return Ok(None);
        }

        let ttl: i64 = from_redis_value(&source.call("ttl", &[key_arg(key)]).await?)?;
        if ttl > 0 {
            target.call("expire", &[key_arg(key), Arg::Int(ttl)]).await?;
        }
        Ok(Some(alias))
    }

    async fn flush_targets<K: Connector>(&self, connector: &K) -> Result<()> {
        for &db in &self.options.databases {
            for (alias, mut conn) in self.connect_targets(connector, db).await? {
                conn.call("flushdb", &[]).await?;
                info!("Flushed {} (db {})", alias, db);
            }
        }
        Ok(())
    }

    /// One connection per shard master, in `db`
    async fn connect_targets<K: Connector>(
        &self,
        connector: &K,
        db: i64,
    ) -> Result<BTreeMap<String, K::Conn>> {
        let mut targets = BTreeMap::new();
        for shard in 1..=self.topology.shard_count() {
            let alias = shard_alias(shard);
            let addr = self
                .topology
                .address(&alias)
                .ok_or_else(|| RouterError::UnknownAlias(alias.clone()))?;
            let conn = self.connect(connector, &alias, addr, db).await?;
            targets.insert(alias, conn);
        }
        Ok(targets)
    }

    async fn connect<K: Connector>(
        &self,
        connector: &K,
        alias: &str,
        addr: &NodeAddress,
        db: i64,
    ) -> Result<K::Conn> {
        open(connector, addr, db, self.topology.connect_timeout())
            .await
            .map_err(|reason| RouterError::Connection {
                alias: alias.to_string(),
                addr: addr.to_string(),
                reason,
            })
    }
}

fn key_arg(key: &[u8]) -> Arg {
    Arg::Bytes(key.to_vec())
}

/// Run a read returning a flat array of bulk strings
async fn fetch<C: NodeConnection>(
    source: &mut C,
    op: &str,
    key: &[u8],
    extra: &[Arg],
) -> Result<Vec<Vec<u8>>> {
    let mut args = vec![key_arg(key)];
    args.extend_from_slice(extra);
    Ok(from_redis_value(&source.call(op, &args).await?)?)
}

/// Replace the target's value with `items`. Empty means the key vanished
/// on the source and nothing is written.
async fn replace<C: NodeConnection>(
    target: &mut C,
    op: &str,
    key: &[u8],
    items: Vec<Vec<u8>>,
) -> Result<bool> {
    if items.is_empty() {
        return Ok(false);
    }
    target.call("del", &[key_arg(key)]).await?;

    let mut args = Vec::with_capacity(items.len() + 1);
    args.push(key_arg(key));
    args.extend(items.into_iter().map(Arg::Bytes));
    target.call(op, &args).await?;
    Ok(true)
}
