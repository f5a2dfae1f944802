//! Client-side sharding over independent master/replica nodes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │      Router::invoke(op, args)               │
//! │   classify op, hash key, pick alias         │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │      ConnectionPool                         │
//! │   one connection per alias, replica slots   │
//! │   fall back to their master at startup      │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │      Store nodes (node_1 .. node_2N, ...)   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - `Topology`: static node list, master/replica pairs, default node
//! - `shard_for_key`: `(crc32(key) mod N) + 1`
//! - `ConnectionPool`: eager connections with replica failover
//! - `Router`: dispatch by command class and shard
//! - `Resharder`: batch migration of keys from standalone servers onto the
//!   shard masters, using the same numbering as the router

mod pool;
mod reshard;
mod router;
mod shard;
mod topology;

pub use pool::{ConnectionPool, NodeHandle};
pub use reshard::{
    ReshardOptions, ReshardReport, Resharder, DEFAULT_RESHARD_LIMIT, STATE_PREFIX,
};
pub use router::{route, RouteDecision, Router};
pub use shard::{crc32, shard_for_key};
pub use topology::{
    shard_alias, NodeAddress, Topology, DEFAULT_CONNECT_TIMEOUT_MS, SHARD_ALIAS_PREFIX,
};
