//! Command classification for shard routing
//!
//! Every operation name the router accepts is looked up in three static,
//! disjoint tables:
//!
//! - **Read** commands are hashed by key and served by the shard's replica
//! - **Write** commands are hashed by key and served by the shard's master
//! - **Unhashed** commands carry no key affinity and go to the default node
//!
//! Lookups are case-sensitive. Besides the canonical lowercase command names
//! the tables carry the historical camelCase aliases (`lSize`, `zDelete`, ...)
//! together with the canonical store command each alias stands for.
//! Names found in none of the tables are treated as unhashed.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Routing class of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Key-hashed, served by the shard replica
    Read,
    /// Key-hashed, served by the shard master
    Write,
    /// Not hashed, served by the default node
    Unhashed,
}

impl CommandClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandClass::Read => "read",
            CommandClass::Write => "write",
            CommandClass::Unhashed => "unhashed",
        }
    }

    /// Whether the class routes by key hash
    pub fn is_hashed(&self) -> bool {
        !matches!(self, CommandClass::Unhashed)
    }
}

impl fmt::Display for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the command table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    pub class: CommandClass,
    /// Store command sent on the wire, `None` for client-local operations
    pub wire: Option<&'static str>,
}

/// Read commands: `(name, wire command)`
pub const READ_COMMANDS: &[(&str, &str)] = &[
    ("debug", "DEBUG"),
    ("object", "OBJECT"),
    ("exists", "EXISTS"),
    ("getbit", "GETBIT"),
    ("get", "GET"),
    ("getrange", "GETRANGE"),
    ("hexists", "HEXISTS"),
    ("hget", "HGET"),
    ("hgetall", "HGETALL"),
    ("hkeys", "HKEYS"),
    ("hlen", "HLEN"),
    ("hmget", "HMGET"),
    ("hvals", "HVALS"),
    ("keys", "KEYS"),
    ("lindex", "LINDEX"),
    ("llen", "LLEN"),
    ("lrange", "LRANGE"),
    ("mget", "MGET"),
    ("psubscribe", "PSUBSCRIBE"),
    ("scard", "SCARD"),
    ("sismember", "SISMEMBER"),
    ("smembers", "SMEMBERS"),
    ("srandmember", "SRANDMEMBER"),
    ("strlen", "STRLEN"),
    ("ttl", "TTL"),
    ("type", "TYPE"),
    ("zcard", "ZCARD"),
    ("zcount", "ZCOUNT"),
    ("zrange", "ZRANGE"),
    ("zrangebyscore", "ZRANGEBYSCORE"),
    ("zrank", "ZRANK"),
    ("zrevrange", "ZREVRANGE"),
    ("zrevrangebyscore", "ZREVRANGEBYSCORE"),
    ("zrevrank", "ZREVRANK"),
    ("zscore", "ZSCORE"),
    // camelCase aliases
    ("getMultiple", "MGET"),
    ("lSize", "LLEN"),
    ("lGetRange", "LRANGE"),
    ("sContains", "SISMEMBER"),
    ("sSize", "SCARD"),
    ("sGetMembers", "SMEMBERS"),
    ("getKeys", "KEYS"),
    ("zSize", "ZCARD"),
];

/// Write commands: `(name, wire command)`
pub const WRITE_COMMANDS: &[(&str, &str)] = &[
    ("append", "APPEND"),
    ("blpop", "BLPOP"),
    ("brpop", "BRPOP"),
    ("brpoplpush", "BRPOPLPUSH"),
    ("decr", "DECR"),
    ("decrby", "DECRBY"),
    ("del", "DEL"),
    ("expire", "EXPIRE"),
    ("expireat", "EXPIREAT"),
    ("getset", "GETSET"),
    ("hdel", "HDEL"),
    ("hincrby", "HINCRBY"),
    ("hmset", "HMSET"),
    ("hset", "HSET"),
    ("hsetnx", "HSETNX"),
    ("incr", "INCR"),
    ("incrby", "INCRBY"),
    ("linsert", "LINSERT"),
    ("lpop", "LPOP"),
    ("lpush", "LPUSH"),
    ("lpushx", "LPUSHX"),
    ("lrem", "LREM"),
    ("lset", "LSET"),
    ("ltrim", "LTRIM"),
    ("move", "MOVE"),
    ("mset", "MSET"),
    ("msetnx", "MSETNX"),
    ("persist", "PERSIST"),
    ("publish", "PUBLISH"),
    ("punsubscribe", "PUNSUBSCRIBE"),
    ("rename", "RENAME"),
    ("renamenx", "RENAMENX"),
    ("rpop", "RPOP"),
    ("rpoplpush", "RPOPLPUSH"),
    ("rpush", "RPUSH"),
    ("rpushx", "RPUSHX"),
    ("sadd", "SADD"),
    ("sdiff", "SDIFF"),
    ("sdiffstore", "SDIFFSTORE"),
    ("set", "SET"),
    ("setbit", "SETBIT"),
    ("setex", "SETEX"),
    ("setnx", "SETNX"),
    ("setrange", "SETRANGE"),
    ("sinter", "SINTER"),
    ("sinterstore", "SINTERSTORE"),
    ("smove", "SMOVE"),
    ("sort", "SORT"),
    ("spop", "SPOP"),
    ("srem", "SREM"),
    ("subscribe", "SUBSCRIBE"),
    ("sunion", "SUNION"),
    ("sunionstore", "SUNIONSTORE"),
    ("unsubscribe", "UNSUBSCRIBE"),
    ("unwatch", "UNWATCH"),
    ("watch", "WATCH"),
    ("zadd", "ZADD"),
    ("zincrby", "ZINCRBY"),
    ("zinterstore", "ZINTERSTORE"),
    ("zrem", "ZREM"),
    ("zremrangebyrank", "ZREMRANGEBYRANK"),
    ("zremrangebyscore", "ZREMRANGEBYSCORE"),
    ("zunionstore", "ZUNIONSTORE"),
    // camelCase aliases
    ("listTrim", "LTRIM"),
    ("lRemove", "LREM"),
    ("sRemove", "SREM"),
    ("renameKey", "RENAME"),
    ("setTimeout", "EXPIRE"),
    ("zDelete", "ZREM"),
    ("zDeleteRangeByScore", "ZREMRANGEBYSCORE"),
    ("zDeleteRangeByRank", "ZREMRANGEBYRANK"),
];

/// Unhashed (administrative) commands: `(name, wire command)`.
/// An empty wire command marks a client-local operation.
pub const UNHASHED_COMMANDS: &[(&str, &str)] = &[
    ("auth", "AUTH"),
    ("bgrewriteaof", "BGREWRITEAOF"),
    ("bgsave", "BGSAVE"),
    ("config", "CONFIG"),
    ("dbsize", "DBSIZE"),
    ("flushall", "FLUSHALL"),
    ("flushdb", "FLUSHDB"),
    ("info", "INFO"),
    ("lastsave", "LASTSAVE"),
    ("monitor", "MONITOR"),
    ("ping", "PING"),
    ("quit", "QUIT"),
    ("randomkey", "RANDOMKEY"),
    ("save", "SAVE"),
    ("select", "SELECT"),
    ("shutdown", "SHUTDOWN"),
    ("slaveof", "SLAVEOF"),
    ("slowlog", "SLOWLOG"),
    ("sync", "SYNC"),
    ("discard", "DISCARD"),
    ("echo", "ECHO"),
    ("exec", "EXEC"),
    ("multi", "MULTI"),
    ("setOption", ""),
    ("getOption", ""),
];

/// Store commands that turn a connection into a push stream
const PUSH_MODE_COMMANDS: &[&str] = &[
    "SUBSCRIBE",
    "PSUBSCRIBE",
    "UNSUBSCRIBE",
    "PUNSUBSCRIBE",
    "MONITOR",
];

fn table() -> &'static HashMap<&'static str, CommandInfo> {
    static TABLE: OnceLock<HashMap<&'static str, CommandInfo>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let groups = [
            (READ_COMMANDS, CommandClass::Read),
            (WRITE_COMMANDS, CommandClass::Write),
            (UNHASHED_COMMANDS, CommandClass::Unhashed),
        ];
        let mut map = HashMap::new();
        for (commands, class) in groups {
            for &(name, wire) in commands {
                let wire = if wire.is_empty() { None } else { Some(wire) };
                map.insert(name, CommandInfo { class, wire });
            }
        }
        map
    })
}

/// Look up the table entry for an operation name
pub fn lookup(name: &str) -> Option<&'static CommandInfo> {
    table().get(name)
}

/// Classify an operation name.
///
/// Unknown names fall back to [`CommandClass::Unhashed`].
///
/// # Example
///
/// ```
/// use shardkv::command::{classify, CommandClass};
///
/// assert_eq!(classify("get"), CommandClass::Read);
/// assert_eq!(classify("listTrim"), CommandClass::Write);
/// assert_eq!(classify("GET"), CommandClass::Unhashed);
/// ```
pub fn classify(name: &str) -> CommandClass {
    lookup(name)
        .map(|info| info.class)
        .unwrap_or(CommandClass::Unhashed)
}

/// Store command to put on the wire for an operation name.
///
/// Known names map to their canonical command, unknown names are sent as
/// given. Returns `None` for client-local operations.
pub fn wire_name(name: &str) -> Option<&str> {
    match lookup(name) {
        Some(info) => info.wire,
        None => Some(name),
    }
}

/// Whether a store command switches its connection into push mode.
///
/// A connection in push mode no longer answers requests one reply at a
/// time, so these need a dedicated pub/sub client. Case-insensitive, as the
/// store treats command names.
pub fn is_push_mode(wire: &str) -> bool {
    PUSH_MODE_COMMANDS
        .iter()
        .any(|cmd| cmd.eq_ignore_ascii_case(wire))
}

/// All known operation names of one class
pub fn commands_of(class: CommandClass) -> impl Iterator<Item = &'static str> {
    let commands = match class {
        CommandClass::Read => READ_COMMANDS,
        CommandClass::Write => WRITE_COMMANDS,
        CommandClass::Unhashed => UNHASHED_COMMANDS,
    };
    commands.iter().map(|&(name, _)| name)
}
