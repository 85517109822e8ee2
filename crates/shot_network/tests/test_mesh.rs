//! Multi-node tests over real loopback sockets.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shot_network::payload::{ChatPayload, KnowledgeUpdatePayload};
use shot_network::{
    BootstrapPeer, HandlerError, Message, MessageKind, NetworkConfig, NetworkError, Node,
    NodeState, PeerId, SendStatus, handler,
};
use tokio::sync::mpsc;

const TRACKED: &str = "tracked";

async fn start_node(id: &str) -> (Node, mpsc::Receiver<Message>) {
    let mut node = Node::named(id, NetworkConfig::local());
    let inbox = node.take_inbox().unwrap();
    node.start().await.unwrap();
    (node, inbox)
}

/// Teach `a` where `b` listens.
fn link(a: &Node, b: &Node) {
    let port = b.local_addr().unwrap().port();
    a.handle()
        .peers()
        .upsert(b.peer_id(), "127.0.0.1", port, chrono::Utc::now());
}

fn link_both(a: &Node, b: &Node) {
    link(a, b);
    link(b, a);
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Records every tracked id the node processes, then keeps flooding it.
fn install_tracker(node: &Node) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    node.register_handler(
        MessageKind::custom(TRACKED),
        handler(move |message: Message, node| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(message.id.clone());
                node.forward(&message).await;
                Ok(())
            }
        }),
    );
    seen
}

#[tokio::test]
async fn test_ttl_one_is_not_forwarded() {
    let (mut a, _ia) = start_node("a").await;
    let (mut b, _ib) = start_node("b").await;
    let (mut c, _ic) = start_node("c").await;
    link(&a, &b);
    link_both(&b, &c);
    let at_b = install_tracker(&b);
    let at_c = install_tracker(&c);

    a.broadcast(MessageKind::custom(TRACKED), serde_json::json!({}), Some(1))
        .await
        .unwrap();
    eventually("b to process the tracked message", || at_b.lock().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(at_c.lock().is_empty());

    // One more hop reaches c.
    a.broadcast(MessageKind::custom(TRACKED), serde_json::json!({}), Some(2))
        .await
        .unwrap();
    eventually("c to process the tracked message", || at_c.lock().len() == 1).await;

    a.stop().await;
    b.stop().await;
    c.stop().await;
}

#[tokio::test]
async fn test_transitive_discovery() {
    let (mut a, _ia) = start_node("a").await;
    let (mut b, _ib) = start_node("b").await;
    let (mut c, _ic) = start_node("c").await;
    let port_of = |n: &Node| n.local_addr().unwrap().port();

    b.discover(&[BootstrapPeer::new("a", "127.0.0.1", port_of(&a))])
        .await
        .unwrap();
    eventually("a to learn b", || a.list_peers().contains(b.peer_id())).await;

    c.discover(&[BootstrapPeer::new("b", "127.0.0.1", port_of(&b))])
        .await
        .unwrap();

    // c's announce is relayed by b; a replies directly to c.
    eventually("a to learn c", || a.list_peers().contains(c.peer_id())).await;
    eventually("c to learn a", || c.list_peers().contains(a.peer_id())).await;

    let record = a.handle().peers().get(c.peer_id()).unwrap();
    assert_eq!(record.port, port_of(&c));
    assert!(record.capabilities.iter().any(|cap| cap == "chat"));

    a.stop().await;
    b.stop().await;
    c.stop().await;
}

#[tokio::test]
async fn test_exactly_once_over_redundant_paths() {
    let mut nodes = Vec::new();
    for id in ["n0", "n1", "n2", "n3"] {
        nodes.push(start_node(id).await);
    }
    for i in 0..nodes.len() {
        for j in 0..nodes.len() {
            if i != j {
                link(&nodes[i].0, &nodes[j].0);
            }
        }
    }
    let trackers: Vec<_> = nodes.iter().map(|(n, _)| install_tracker(n)).collect();

    nodes[0]
        .0
        .broadcast(MessageKind::custom(TRACKED), serde_json::json!({"n": 1}), None)
        .await
        .unwrap();

    for tracker in &trackers[1..] {
        eventually("every peer to process the tracked message", || {
            tracker.lock().len() == 1
        })
        .await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    // The origin never processes its own message, everyone else once.
    assert!(trackers[0].lock().is_empty());
    for tracker in &trackers[1..] {
        assert_eq!(tracker.lock().len(), 1);
    }

    for (node, _) in &mut nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_concurrent_senders() {
    const PER_SENDER: usize = 30;

    let mut nodes = Vec::new();
    for id in ["s0", "s1", "s2", "observer"] {
        nodes.push(start_node(id).await);
    }
    for i in 0..nodes.len() {
        for j in 0..nodes.len() {
            if i != j {
                link(&nodes[i].0, &nodes[j].0);
            }
        }
    }
    let trackers: Vec<_> = nodes.iter().map(|(n, _)| install_tracker(n)).collect();

    let mut senders = tokio::task::JoinSet::new();
    for (node, _) in &nodes[..3] {
        let handle = node.handle();
        senders.spawn(async move {
            for i in 0..PER_SENDER {
                handle
                    .broadcast(MessageKind::custom(TRACKED), serde_json::json!({"i": i}), None)
                    .await
                    .unwrap();
            }
        });
    }
    while let Some(result) = senders.join_next().await {
        result.unwrap();
    }

    let observer = &trackers[3];
    eventually("observer to process every tracked message", || {
        observer.lock().len() == 3 * PER_SENDER
    })
    .await;
    for tracker in &trackers[..3] {
        eventually("senders to process each other's messages", || {
            tracker.lock().len() == 2 * PER_SENDER
        })
        .await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    for tracker in &trackers {
        let ids = tracker.lock();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len(), "a message was processed twice");
    }
    assert_eq!(observer.lock().len(), 3 * PER_SENDER);

    for (node, _) in &mut nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_stop_then_restart() {
    let (mut a, mut inbox_a) = start_node("a").await;
    let (mut b, _ib) = start_node("b").await;
    link_both(&a, &b);
    let b_addr = b.local_addr().unwrap();

    b.stop().await;
    assert_eq!(b.state(), NodeState::Stopped);

    // The listener is gone while stopped.
    assert!(tokio::net::TcpStream::connect(b_addr).await.is_err());

    // The leave notice reaches a, which forgets b.
    eventually("a to drop b", || !a.handle().peers().contains(b.peer_id())).await;
    let result = a
        .send(b.peer_id(), MessageKind::ChatMessage, serde_json::json!({}))
        .await;
    assert!(matches!(result, Err(NetworkError::UnknownPeer(_))));

    // Outbound operations on a stopped node are refused.
    assert!(matches!(
        b.send_chat("too late").await,
        Err(NetworkError::NotRunning)
    ));

    // Restart on the same address, rejoin and talk again.
    let restarted = b.start().await.unwrap();
    assert_eq!(restarted, b_addr);
    let a_port = a.local_addr().unwrap().port();
    b.discover(&[BootstrapPeer::new("a", "127.0.0.1", a_port)])
        .await
        .unwrap();
    eventually("a to relearn b", || a.list_peers().contains(b.peer_id())).await;

    b.send_chat("back again").await.unwrap();
    let message = tokio::time::timeout(Duration::from_secs(5), inbox_a.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ChatPayload::parse(&message.payload).unwrap().text,
        "back again"
    );

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_send_to_dead_peer_fails_within_timeout() {
    let mut config = NetworkConfig::local();
    config.connect_timeout = Duration::from_millis(500);
    config.write_timeout = Duration::from_millis(500);
    let mut node = Node::named("dialer", config);
    node.start().await.unwrap();

    let dead_port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let ghost = PeerId::from_string("ghost");
    node.handle()
        .peers()
        .upsert(&ghost, "127.0.0.1", dead_port, chrono::Utc::now());

    let started = Instant::now();
    let status = node
        .send(&ghost, MessageKind::ChatMessage, serde_json::json!({}))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(status, SendStatus::Failed(_)));
    assert_eq!(node.handle().peers().get(&ghost).unwrap().failures, 1);

    node.stop().await;
}

#[tokio::test]
async fn test_unknown_peer() {
    let (mut node, _inbox) = start_node("solo").await;
    let result = node
        .send(
            &PeerId::from_string("missing"),
            MessageKind::ChatMessage,
            serde_json::json!({}),
        )
        .await;
    assert!(matches!(result, Err(NetworkError::UnknownPeer(p)) if p.as_str() == "missing"));
    node.stop().await;
}

#[tokio::test]
async fn test_failing_handler_does_not_block_dispatch() {
    let (mut a, _ia) = start_node("a").await;
    let (mut b, mut inbox_b) = start_node("b").await;
    link_both(&a, &b);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    b.register_handler(
        MessageKind::custom("fragile"),
        handler(move |_message, _node| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(HandlerError::Failed("cannot cope".into())) }
        }),
    );

    a.send(b.peer_id(), MessageKind::custom("fragile"), serde_json::json!({}))
        .await
        .unwrap();
    a.send(
        b.peer_id(),
        MessageKind::ChatMessage,
        ChatPayload::new("still here").into_value(),
    )
    .await
    .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), inbox_b.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.kind, MessageKind::ChatMessage);
    eventually("the fragile handler to run", || {
        calls.load(Ordering::SeqCst) == 1
    })
    .await;

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_resources_and_knowledge_reach_peers() {
    let (mut a, _ia) = start_node("a").await;
    let (mut b, mut inbox_b) = start_node("b").await;
    link_both(&a, &b);

    let (resource_id, report) = a
        .share_resource("dataset", serde_json::json!({"rows": 42}))
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
    assert!(a.resources().get(&resource_id).is_some());
    eventually("b to catalog the resource", || {
        b.resources().get(&resource_id).is_some()
    })
    .await;
    let resource = b.resources().get(&resource_id).unwrap();
    assert_eq!(resource.source.as_str(), "a");
    assert_eq!(resource.data["rows"], 42);

    // knowledge_update has no built-in handler and is queued for the app.
    let mut knowledge = KnowledgeUpdatePayload::new(a.peer_id());
    knowledge.codex = vec!["scan".into()];
    let report = a
        .share_knowledge(Some(b.peer_id()), knowledge)
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);

    let message = tokio::time::timeout(Duration::from_secs(5), inbox_b.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.kind, MessageKind::KnowledgeUpdate);
    let parsed = KnowledgeUpdatePayload::parse(&message.payload).unwrap();
    assert_eq!(parsed.codex, vec!["scan".to_string()]);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_knowledge_to_all_peers() {
    let (mut a, _ia) = start_node("a").await;
    let (mut b, mut inbox_b) = start_node("b").await;
    let (mut c, mut inbox_c) = start_node("c").await;
    link(&a, &b);
    link(&a, &c);

    let mut knowledge = KnowledgeUpdatePayload::new(a.peer_id());
    knowledge.known_nodes = vec!["b".into(), "c".into()];
    let report = a.share_knowledge(None, knowledge).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert!(report.failed.is_empty());

    for inbox in [&mut inbox_b, &mut inbox_c] {
        let message = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.kind, MessageKind::KnowledgeUpdate);
        assert_eq!(message.sender_id.as_str(), "a");
    }

    a.stop().await;
    b.stop().await;
    c.stop().await;
}

fn lively_config() -> NetworkConfig {
    let mut config = NetworkConfig::local();
    config.peer_stale_after = Duration::from_secs(1);
    config.maintenance_interval = Duration::from_millis(100);
    config.bootstrap_retry = Duration::from_millis(200);
    config.connect_timeout = Duration::from_millis(300);
    config
}

#[tokio::test]
async fn test_idle_mesh_stays_connected_past_staleness_window() {
    let mut a = Node::named("a", lively_config());
    let mut b = Node::named("b", lively_config());
    let mut c = Node::named("c", lively_config());
    a.start().await.unwrap();
    b.start().await.unwrap();
    c.start().await.unwrap();

    // a and b know each other; c only knows b and never sends anything
    // itself beyond its periodic announce.
    link_both(&a, &b);
    link(&c, &b);

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(a.list_peers().contains(b.peer_id()));
    assert!(b.list_peers().contains(a.peer_id()));
    assert!(b.list_peers().contains(c.peer_id()));
    assert!(c.list_peers().contains(b.peer_id()));

    // Still reachable by id after the window.
    let status = a
        .send(b.peer_id(), MessageKind::ChatMessage, ChatPayload::new("ping").into_value())
        .await
        .unwrap();
    assert!(status.is_delivered());

    a.stop().await;
    b.stop().await;
    c.stop().await;
}

#[tokio::test]
async fn test_joiner_retries_bootstrap_until_it_comes_up() {
    // Reserve a port for the bootstrap node, then free it.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let mut joiner_config = lively_config();
    joiner_config.bootstrap_peers = vec![BootstrapPeer::new("seed", "127.0.0.1", port)];
    let mut joiner = Node::named("joiner", joiner_config);
    joiner.start().await.unwrap();

    // Long enough for the first attempts to fail and the seed to be dropped.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let mut seed_config = lively_config();
    seed_config.listen_port = Some(port);
    let mut seed = Node::named("seed", seed_config);
    seed.start().await.unwrap();

    eventually("the seed to learn the joiner", || {
        seed.list_peers().contains(joiner.peer_id())
    })
    .await;
    eventually("the joiner to know the seed", || {
        joiner.list_peers().contains(seed.peer_id())
    })
    .await;

    joiner.stop().await;
    seed.stop().await;
}
