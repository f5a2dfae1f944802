//! Routing and failover tests for the shard router
//!
//! These tests run the router against an in-memory connector that records
//! which node address served every call, and can mark addresses as down or
//! unresponsive.

use async_trait::async_trait;
use redis::{ErrorKind, RedisResult, Value};
use shardkv::cluster::{shard_alias, shard_for_key};
use shardkv::{Arg, Connector, NodeAddress, NodeConnection, Router, RouterError, Topology};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One call observed by a mock node
#[derive(Debug, Clone)]
struct Call {
    port: u16,
    conn_id: usize,
    db: i64,
    op: String,
    args: Vec<Arg>,
}

#[derive(Clone, Default)]
struct MockCluster {
    down: Arc<Mutex<HashSet<u16>>>,
    hanging: Arc<Mutex<HashSet<u16>>>,
    allowed: Arc<Mutex<HashMap<u16, usize>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    connects: Arc<Mutex<Vec<u16>>>,
    next_id: Arc<AtomicUsize>,
}

impl MockCluster {
    fn new() -> Self {
        Self::default()
    }

    fn take_down(&self, port: u16) {
        self.down.lock().unwrap().insert(port);
    }

    /// Accept only the next `n` connections to `port`
    fn allow_connects(&self, port: u16, n: usize) {
        self.allowed.lock().unwrap().insert(port, n);
    }

    fn hang(&self, port: u16) {
        self.hanging.lock().unwrap().insert(port);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn last_call(&self) -> Call {
        self.calls().last().cloned().expect("no call recorded")
    }

    fn connects(&self) -> Vec<u16> {
        self.connects.lock().unwrap().clone()
    }
}

struct MockConnection {
    port: u16,
    id: usize,
    db: i64,
    cluster: MockCluster,
}

#[async_trait]
impl NodeConnection for MockConnection {
    async fn select_db(&mut self, db: i64) -> RedisResult<()> {
        self.db = db;
        Ok(())
    }

    async fn call(&mut self, op: &str, args: &[Arg]) -> RedisResult<Value> {
        self.cluster.calls.lock().unwrap().push(Call {
            port: self.port,
            conn_id: self.id,
            db: self.db,
            op: op.to_string(),
            args: args.to_vec(),
        });

        if op == "fail" {
            return Err((ErrorKind::ResponseError, "ERR simulated failure").into());
        }
        Ok(Value::Data(format!("{}:{}", self.port, op).into_bytes()))
    }
}

#[async_trait]
impl Connector for MockCluster {
    type Conn = MockConnection;

    async fn connect(&self, addr: &NodeAddress) -> RedisResult<MockConnection> {
        self.connects.lock().unwrap().push(addr.port);

        let hanging = self.hanging.lock().unwrap().contains(&addr.port);
        if hanging {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.down.lock().unwrap().contains(&addr.port) {
            return Err((ErrorKind::IoError, "Connection refused").into());
        }
        if let Some(remaining) = self.allowed.lock().unwrap().get_mut(&addr.port) {
            if *remaining == 0 {
                return Err((ErrorKind::IoError, "Connection refused").into());
            }
            *remaining -= 1;
        }

        Ok(MockConnection {
            port: addr.port,
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            db: 0,
            cluster: self.clone(),
        })
    }
}

/// Port of shard master `k` is `7000 + k`, its replica `8000 + k`,
/// the default node `9000`.
fn master_port(shard: usize) -> u16 {
    7000 + shard as u16
}

fn replica_port(shard: usize) -> u16 {
    8000 + shard as u16
}

const DEFAULT_PORT: u16 = 9000;

fn topology(shards: usize) -> Topology {
    let mut topology = Topology::new()
        .with_node("default_node", NodeAddress::new("127.0.0.1", DEFAULT_PORT))
        .with_default_node("default_node")
        .with_database(3);
    for shard in 1..=shards {
        let replica = format!("replica_{}", shard);
        topology = topology
            .with_node(shard_alias(shard), NodeAddress::new("127.0.0.1", master_port(shard)))
            .with_node(replica.clone(), NodeAddress::new("127.0.0.1", replica_port(shard)))
            .with_replica(shard_alias(shard), replica);
    }
    topology
}

/// The single-shard example: node_1 master, node_2 its replica
fn example_topology() -> Topology {
    Topology::new()
        .with_node("node_1", NodeAddress::new("127.0.0.1", 7001))
        .with_node("node_2", NodeAddress::new("127.0.0.1", 7002))
        .with_replica("node_1", "node_2")
        .with_default_node("node_1")
}

fn data(value: &Value) -> String {
    match value {
        Value::Data(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn test_single_shard_example() {
    let cluster = MockCluster::new();
    let router = Router::connect(example_topology(), &cluster).await.unwrap();

    for _ in 0..5 {
        let reply = router
            .invoke("set", vec!["foo".into(), "bar".into()])
            .await
            .unwrap();
        assert_eq!(data(&reply), "7001:set");

        let reply = router.invoke("get", vec!["foo".into()]).await.unwrap();
        assert_eq!(data(&reply), "7002:get");
    }
}

#[tokio::test]
async fn test_writes_hit_master_and_reads_hit_replica() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(3), &cluster).await.unwrap();

    for i in 0..30 {
        let key = format!("user:{}", i);
        let shard = shard_for_key(key.as_bytes(), 3);

        router
            .invoke("hset", vec![key.clone().into(), "f".into(), "v".into()])
            .await
            .unwrap();
        assert_eq!(cluster.last_call().port, master_port(shard));

        router.invoke("hget", vec![key.into(), "f".into()]).await.unwrap();
        assert_eq!(cluster.last_call().port, replica_port(shard));
    }
}

#[tokio::test]
async fn test_camel_case_aliases_route_by_class() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(2), &cluster).await.unwrap();
    let shard = shard_for_key(b"mylist", 2);

    router.invoke("lSize", vec!["mylist".into()]).await.unwrap();
    assert_eq!(cluster.last_call().port, replica_port(shard));

    router
        .invoke("listTrim", vec!["mylist".into(), 0.into(), 10.into()])
        .await
        .unwrap();
    let call = cluster.last_call();
    assert_eq!(call.port, master_port(shard));
    assert_eq!(call.op, "listTrim");
}

#[tokio::test]
async fn test_unhashed_commands_hit_default_node() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(3), &cluster).await.unwrap();

    for op in ["ping", "info", "dbsize", "multi", "exec", "unknown_op"] {
        for key in ["a", "b", "c"] {
            router.invoke(op, vec![key.into()]).await.unwrap();
            assert_eq!(cluster.last_call().port, DEFAULT_PORT);
        }
    }
    router.invoke("ping", vec![]).await.unwrap();
    assert_eq!(cluster.last_call().port, DEFAULT_PORT);
}

#[tokio::test]
async fn test_key_tag_routes_by_tag_and_forwards_real_key() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(4), &cluster).await.unwrap();

    router
        .invoke("get", vec![Arg::tagged("tagA", "realkey")])
        .await
        .unwrap();

    let call = cluster.last_call();
    assert_eq!(call.port, replica_port(shard_for_key(b"tagA", 4)));
    assert_eq!(call.args, vec![Arg::from("realkey")]);
}

#[tokio::test]
async fn test_key_tag_colocates_keys() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(4), &cluster).await.unwrap();

    for field in ["name", "age", "email", "city"] {
        let key = format!("user:42:{}", field);
        router
            .invoke("set", vec![Arg::tagged("user:42", key), "x".into()])
            .await
            .unwrap();
    }

    let ports: HashSet<u16> = cluster.calls().iter().map(|c| c.port).collect();
    assert_eq!(ports.len(), 1);
}

#[tokio::test]
async fn test_database_selected_on_every_connection() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(2), &cluster).await.unwrap();

    router.invoke("set", vec!["a".into(), "1".into()]).await.unwrap();
    router.invoke("get", vec!["a".into()]).await.unwrap();
    router.invoke("ping", vec![]).await.unwrap();

    assert!(cluster.calls().iter().all(|c| c.db == 3));
}

#[tokio::test]
async fn test_empty_nodes_is_config_error() {
    let cluster = MockCluster::new();
    let topology = Topology::new()
        .with_replica("node_1", "node_2")
        .with_default_node("node_1");

    let result = Router::connect(topology, &cluster).await;
    assert!(matches!(result, Err(RouterError::Config(_))));
    assert!(cluster.connects().is_empty());
}

#[tokio::test]
async fn test_empty_master_of_is_config_error() {
    let cluster = MockCluster::new();
    let topology = Topology::new()
        .with_node("node_1", NodeAddress::new("127.0.0.1", 7001))
        .with_default_node("node_1");

    let result = Router::connect(topology, &cluster).await;
    assert!(matches!(result, Err(RouterError::Config(_))));
    assert!(cluster.connects().is_empty());
}

#[tokio::test]
async fn test_unreachable_replica_falls_back_to_master() {
    let cluster = MockCluster::new();
    cluster.take_down(7002);

    let router = Router::connect(example_topology(), &cluster).await.unwrap();

    let reply = router.invoke("get", vec!["foo".into()]).await.unwrap();
    assert_eq!(data(&reply), "7001:get");

    let replica = router.connection_for("node_2").unwrap();
    assert!(replica.is_failover());
    assert_eq!(replica.served_by(), "node_1");
    assert_eq!(replica.address().port, 7001);
    assert_eq!(router.metrics().failovers.get(), 1);
}

#[tokio::test]
async fn test_failover_slot_has_its_own_connection() {
    let cluster = MockCluster::new();
    cluster.take_down(7002);
    let router = Router::connect(example_topology(), &cluster).await.unwrap();

    router.invoke("set", vec!["foo".into(), "1".into()]).await.unwrap();
    let master_conn = cluster.last_call().conn_id;
    router.invoke("get", vec!["foo".into()]).await.unwrap();
    let replica_conn = cluster.last_call().conn_id;

    assert_ne!(master_conn, replica_conn);

    // selecting a database on the replica slot leaves the master slot alone
    router
        .connection_for("node_2")
        .unwrap()
        .lock()
        .await
        .select_db(9)
        .await
        .unwrap();
    router.invoke("set", vec!["foo".into(), "2".into()]).await.unwrap();
    assert_eq!(cluster.last_call().db, 0);
}

#[tokio::test]
async fn test_replica_and_master_unreachable_is_connection_error() {
    let cluster = MockCluster::new();
    cluster.take_down(7001);
    cluster.take_down(7002);

    match Router::connect(example_topology(), &cluster).await {
        Err(RouterError::Connection { alias, .. }) => assert_eq!(alias, "node_1"),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("construction should fail"),
    }
}

#[tokio::test]
async fn test_unreachable_master_is_connection_error() {
    let cluster = MockCluster::new();
    cluster.take_down(master_port(2));

    // masters have no fallback, even with a live replica
    match Router::connect(topology(2), &cluster).await {
        Err(RouterError::Connection { alias, addr, .. }) => {
            assert_eq!(alias, "node_2");
            assert_eq!(addr, format!("127.0.0.1:{}", master_port(2)));
        }
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("construction should fail"),
    }
}

#[tokio::test]
async fn test_master_lost_before_replica_fallback() {
    let cluster = MockCluster::new();
    // master accepts its own connection, then refuses the fallback one
    cluster.allow_connects(master_port(1), 1);
    cluster.take_down(replica_port(1));

    match Router::connect(topology(1), &cluster).await {
        Err(RouterError::Connection { alias, reason, .. }) => {
            assert_eq!(alias, "replica_1");
            assert!(reason.contains("master node_1"));
        }
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("construction should fail"),
    }
}

#[tokio::test]
async fn test_non_replica_node_unreachable_is_connection_error() {
    let cluster = MockCluster::new();
    cluster.take_down(DEFAULT_PORT);

    let result = Router::connect(topology(2), &cluster).await;
    assert!(matches!(
        result,
        Err(RouterError::Connection { ref alias, .. }) if alias == "default_node"
    ));
}

#[tokio::test]
async fn test_connect_timeout() {
    let cluster = MockCluster::new();
    cluster.hang(DEFAULT_PORT);
    let topology = topology(1).with_connect_timeout(Duration::from_millis(50));

    match Router::connect(topology, &cluster).await {
        Err(RouterError::Connection { reason, .. }) => assert!(reason.contains("timed out")),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("construction should fail"),
    }
}

#[tokio::test]
async fn test_masters_connect_before_replicas() {
    let cluster = MockCluster::new();
    let topology = Topology::new()
        .with_node("a_replica", NodeAddress::new("127.0.0.1", 8001))
        .with_node("default_node", NodeAddress::new("127.0.0.1", 9000))
        .with_node("node_1", NodeAddress::new("127.0.0.1", 7001))
        .with_replica("node_1", "a_replica")
        .with_default_node("default_node");

    Router::connect(topology, &cluster).await.unwrap();
    assert_eq!(cluster.connects(), vec![7001, 9000, 8001]);
}

#[tokio::test]
async fn test_upstream_error_is_propagated() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(1), &cluster).await.unwrap();

    let err = router.invoke("fail", vec!["k".into()]).await.unwrap_err();
    match err {
        RouterError::Upstream(e) => {
            assert_eq!(e.kind(), ErrorKind::ResponseError);
            assert!(e.to_string().contains("simulated failure"));
        }
        other => panic!("unexpected error {}", other),
    }
    assert_eq!(router.metrics().upstream_errors.get(), 1);

    // one call, no retry
    assert_eq!(cluster.calls().len(), 1);
}

#[tokio::test]
async fn test_connection_for() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(2), &cluster).await.unwrap();

    let node = router.connection_for("node_2").unwrap();
    assert_eq!(node.alias(), "node_2");
    assert!(!node.is_failover());

    let reply = node.lock().await.call("multi", &[]).await.unwrap();
    assert_eq!(data(&reply), format!("{}:multi", master_port(2)));

    assert!(matches!(
        router.connection_for("node_9"),
        Err(RouterError::UnknownAlias(alias)) if alias == "node_9"
    ));
}

#[tokio::test]
async fn test_aliases_cover_every_node() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(2), &cluster).await.unwrap();

    let aliases: Vec<&str> = router.aliases().collect();
    assert_eq!(
        aliases,
        vec!["default_node", "node_1", "node_2", "replica_1", "replica_2"]
    );
}

#[tokio::test]
async fn test_metrics_count_calls() {
    let cluster = MockCluster::new();
    let router = Router::connect(example_topology(), &cluster).await.unwrap();

    router.invoke("set", vec!["a".into(), "1".into()]).await.unwrap();
    router.invoke("get", vec!["a".into()]).await.unwrap();
    router.invoke("get", vec!["b".into()]).await.unwrap();
    router.invoke("echo", vec!["hi".into()]).await.unwrap();

    let snapshot = router.metrics().snapshot();
    assert_eq!(snapshot.writes, 1);
    assert_eq!(snapshot.reads, 2);
    assert_eq!(snapshot.unhashed, 1);
    assert_eq!(snapshot.calls_by_alias.get("node_2"), Some(&2));
    assert_eq!(snapshot.calls_by_alias.get("node_1"), Some(&2));
}

#[tokio::test]
async fn test_concurrent_callers_share_router() {
    let cluster = MockCluster::new();
    let router = Arc::new(Router::connect(topology(3), &cluster).await.unwrap());

    let mut handles = Vec::new();
    for worker in 0..8 {
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                let key = format!("w{}:k{}", worker, i);
                router
                    .invoke("set", vec![key.clone().into(), "v".into()])
                    .await
                    .unwrap();
                router.invoke("get", vec![key.into()]).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cluster.calls().len(), 8 * 25 * 2);
    assert_eq!(router.metrics().total_calls(), 400);
}

#[tokio::test]
async fn test_route_matches_invoke() {
    let cluster = MockCluster::new();
    let router = Router::connect(topology(5), &cluster).await.unwrap();

    for i in 0..20 {
        let key = format!("key{}", i);
        let decision = router.route("zadd", vec![key.clone().into()]).unwrap();
        router.invoke("zadd", vec![key.into()]).await.unwrap();

        let expected = router.topology().address(&decision.alias).unwrap().port;
        assert_eq!(cluster.last_call().port, expected);
    }
}
