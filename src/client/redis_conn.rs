use super::{Arg, Connector, NodeConnection};
use crate::cluster::NodeAddress;
use crate::command;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, ErrorKind, RedisResult, Value};

/// Opens `redis` crate connections on the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }

    fn url(addr: &NodeAddress) -> String {
        // IPv6 literals need brackets inside a URL
        if addr.host.contains(':') && !addr.host.starts_with('[') {
            format!("redis://[{}]:{}/", addr.host, addr.port)
        } else {
            format!("redis://{}:{}/", addr.host, addr.port)
        }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Conn = RedisConnection;

    async fn connect(&self, addr: &NodeAddress) -> RedisResult<RedisConnection> {
        let client = Client::open(Self::url(addr))?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(RedisConnection { conn })
    }
}

/// Connection to one Redis-compatible node.
///
/// The connection is multiplexed request/response. Pub/sub and `MONITOR`
/// are refused with a client error; use a dedicated `redis` pub/sub
/// connection to the address from [`Router::connection_for`] for those.
///
/// [`Router::connection_for`]: crate::Router::connection_for
pub struct RedisConnection {
    conn: MultiplexedConnection,
}

/// Store command to send for an operation, or the client error refusing it
fn wire_command(op: &str) -> RedisResult<&str> {
    let Some(wire) = command::wire_name(op) else {
        return Err((
            ErrorKind::ClientError,
            "client-side option has no store command",
            op.to_string(),
        )
            .into());
    };
    if command::is_push_mode(wire) {
        return Err((
            ErrorKind::ClientError,
            "push-mode command needs a dedicated pub/sub connection",
            op.to_string(),
        )
            .into());
    }
    Ok(wire)
}

#[async_trait]
impl NodeConnection for RedisConnection {
    async fn select_db(&mut self, db: i64) -> RedisResult<()> {
        redis::cmd("SELECT").arg(db).query_async(&mut self.conn).await
    }

    async fn call(&mut self, op: &str, args: &[Arg]) -> RedisResult<Value> {
        let mut cmd = redis::cmd(wire_command(op)?);
        for arg in args {
            cmd.arg(arg);
        }
        cmd.query_async(&mut self.conn).await
    }
}
