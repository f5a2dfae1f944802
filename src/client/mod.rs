//! Key-value store connection capability
//!
//! The router never speaks the store protocol itself. It talks to nodes
//! through two small traits:
//!
//! - [`Connector`] opens a connection to a [`NodeAddress`]
//! - [`NodeConnection`] selects the logical database and passes named
//!   operations through, returning the store's own reply or error
//!
//! [`RedisConnector`] is the production implementation backed by the
//! `redis` crate. Tests plug in in-memory connectors.

pub mod arg;
mod redis_conn;

pub use arg::Arg;
pub use redis_conn::{RedisConnection, RedisConnector};

use crate::cluster::NodeAddress;
use async_trait::async_trait;
use redis::{RedisResult, Value};

/// A live connection to one store node
#[async_trait]
pub trait NodeConnection: Send + 'static {
    /// Switch the connection to a logical database
    async fn select_db(&mut self, db: i64) -> RedisResult<()>;

    /// Run a named operation with positional arguments
    async fn call(&mut self, op: &str, args: &[Arg]) -> RedisResult<Value>;
}

/// Opens connections to store nodes
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: NodeConnection;

    /// Open a new connection to `addr`.
    ///
    /// Every call must return an independent connection, even when the
    /// same address is opened twice.
    async fn connect(&self, addr: &NodeAddress) -> RedisResult<Self::Conn>;
}
