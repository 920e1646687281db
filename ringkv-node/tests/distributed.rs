//! End-to-end ring scenarios over real TCP on localhost.
//!
//! Every test starts full peers (listener, dispatcher, and maintenance
//! loop) on OS-assigned ports, with heartbeat timers shrunk far below the
//! production defaults so ring convergence takes fractions of a second.
//! State is asserted by polling until a deadline; the protocol is
//! fire-and-forget, so there is no ack to wait on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use ringkv_node::config::NodeConfig;
use ringkv_node::server::{NodeState, ResultEvent, Server};
use ringkv_node::{console, maintenance};
use ringkv_proto::id::NodeId;
use ringkv_proto::message::{Envelope, Payload};
use ringkv_proto::net;

/// How long to wait for ring state to converge before failing.
const CONVERGE: Duration = Duration::from_secs(10);

struct TestNode {
    state: Arc<NodeState>,
    results: mpsc::UnboundedReceiver<ResultEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestNode {
    async fn start() -> TestNode {
        let config = NodeConfig {
            port: 0,
            bootstrap_ip: None,
            bootstrap_port: None,
            host: Some("127.0.0.1".to_string()),
            heartbeat_interval_secs: 0.2,
            predecessor_timeout_secs: 1.5,
        };
        let (server, results) = Server::bind(config).await.expect("bind test node");
        let state = server.state();
        let accept = tokio::spawn(server.run());
        let upkeep = maintenance::spawn(Arc::clone(&state));
        TestNode { state, results, tasks: vec![accept, upkeep] }
    }

    fn ip(&self) -> String {
        self.state.local().ip
    }

    fn port(&self) -> u16 {
        self.state.local().port
    }

    fn id(&self) -> NodeId {
        self.state.local().id
    }

    fn successor_port(&self) -> u16 {
        self.state.overlay.lock().successor().port
    }

    fn predecessor_port(&self) -> Option<u16> {
        self.state.overlay.lock().predecessor().map(|p| p.port)
    }

    async fn join(&self, other: &TestNode) {
        self.state.join(&other.ip(), other.port()).await;
    }

    /// Simulate a crash (or complete a graceful exit): close the listener
    /// and stop the maintenance loop, then wait for both tasks to finish.
    async fn stop(mut self) -> Arc<NodeState> {
        self.state.trigger_shutdown();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.state
    }
}

async fn wait_until(desc: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + CONVERGE;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for: {desc}");
}

/// Two peers, fully converged: each is the other's successor and
/// predecessor.
async fn two_peer_ring() -> (TestNode, TestNode) {
    let a = TestNode::start().await;
    let b = TestNode::start().await;
    b.join(&a).await;
    wait_until("two-peer ring to converge", || {
        a.successor_port() == b.port()
            && a.predecessor_port() == Some(b.port())
            && b.successor_port() == a.port()
            && b.predecessor_port() == Some(a.port())
    })
    .await;
    (a, b)
}

#[tokio::test]
async fn singleton_store_and_retrieve() {
    let node = TestNode::start().await;

    console::put(&node.state, "foo".to_string(), "bar".to_string()).await;
    assert_eq!(
        console::get(&node.state, "foo".to_string()).await,
        Some("bar".to_string())
    );

    let snapshot = node.state.store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.get("foo"), Some(&"bar".to_string()));

    // A lone peer stays its own successor with no predecessor.
    assert_eq!(node.successor_port(), node.port());
    assert_eq!(node.predecessor_port(), None);
}

#[tokio::test]
async fn two_peer_join_converges() {
    let (_a, _b) = two_peer_ring().await;
}

#[tokio::test]
async fn put_replicates_to_successor() {
    let (a, b) = two_peer_ring().await;

    let msg = Envelope::new(
        NodeId::hash("external-client"),
        Payload::Put {
            key: "rep".to_string(),
            value: "ok".to_string(),
            is_replica: false,
        },
    );
    net::send_envelope(&a.ip(), a.port(), &msg)
        .await
        .expect("deliver external put");

    wait_until("write to reach primary and replica", || {
        a.state.store.get("rep") == Some("ok".to_string())
            && b.state.store.get("rep") == Some("ok".to_string())
    })
    .await;

    // The replica flag stops the copy from bouncing around the ring; both
    // peers hold exactly the written value.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(a.state.store.get("rep"), Some("ok".to_string()));
    assert_eq!(b.state.store.get("rep"), Some("ok".to_string()));
}

#[tokio::test]
async fn remote_get_is_forwarded_and_answered() {
    let (mut a, b) = two_peer_ring().await;

    // The key lives only on B.
    b.state.store.put("x", "1");

    // A misses locally and relays the lookup to its successor.
    assert_eq!(console::get(&a.state, "x".to_string()).await, None);

    let result = timeout(CONVERGE, a.results.recv())
        .await
        .expect("result before timeout")
        .expect("result channel open");
    assert_eq!(result, ResultEvent { key: "x".to_string(), value: "1".to_string() });
}

#[tokio::test]
async fn successor_failure_collapses_and_ring_reforms() {
    let (a, b) = two_peer_ring().await;

    b.stop().await;

    // The next heartbeat to the dead peer fails and the ring collapses.
    wait_until("successor failure recovery", || {
        a.successor_port() == a.port()
    })
    .await;

    // The silent predecessor ages out as well.
    wait_until("predecessor expiry", || a.predecessor_port().is_none()).await;

    // A fresh peer can rebuild the ring through the survivor.
    let c = TestNode::start().await;
    c.join(&a).await;
    wait_until("ring to reform", || {
        a.successor_port() == c.port() && c.successor_port() == a.port()
    })
    .await;
}

#[tokio::test]
async fn graceful_leave_redirects_both_neighbors() {
    let first = TestNode::start().await;
    let second = TestNode::start().await;
    let third = TestNode::start().await;
    second.join(&first).await;
    wait_until("first two peers to converge", || {
        first.successor_port() == second.port() && second.successor_port() == first.port()
    })
    .await;
    third.join(&first).await;

    // Ring order is dictated by the hashed ids, not by join order.
    let mut nodes = [first, second, third];
    nodes.sort_by_key(|n| n.id());
    let expect_succ = [nodes[1].port(), nodes[2].port(), nodes[0].port()];
    let expect_pred = [nodes[2].port(), nodes[0].port(), nodes[1].port()];
    wait_until("three-peer ring to converge", || {
        (0..3).all(|i| {
            nodes[i].successor_port() == expect_succ[i]
                && nodes[i].predecessor_port() == Some(expect_pred[i])
        })
    })
    .await;

    let [alpha, middle, omega] = nodes;
    let (alpha_port, omega_port) = (alpha.port(), omega.port());

    // Stop the middle peer's loops first so a late heartbeat cannot
    // reinstate it, then let it say goodbye.
    let middle_state = middle.stop().await;
    middle_state.leave().await;

    wait_until("neighbors to be redirected", || {
        alpha.successor_port() == omega_port
            && omega.predecessor_port() == Some(alpha_port)
    })
    .await;
}
