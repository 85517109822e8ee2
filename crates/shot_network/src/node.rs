//! Node: Top-level coordinator for the networking layer.
//!
//! [`Node`] is the primary public API for shot_network. It owns:
//! - the TCP accept loop (one message per inbound connection)
//! - the event loop that dedups and dispatches inbound messages
//! - the maintenance loop that prunes stale peers and old message ids
//! - the peer table, seen-set, dispatcher and resource catalog
//!
//! Handlers and application code talk to a running node through a cloneable
//! [`NodeHandle`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{BootstrapPeer, NetworkConfig};
use crate::error::NetworkError;
use crate::identity::{NodeIdentity, PeerId};
use crate::message::{Message, MessageKind};
use crate::payload::{
    AnnouncePayload, ChatPayload, KnowledgeUpdatePayload, LeavePayload, ResourceAnnouncePayload,
};
use crate::peer::{PeerRecord, PeerTable};
use crate::resource::ResourceCatalog;
use crate::router::{
    self, DispatchOutcome, Dispatcher, MessageHandler, announce_handler, chat_handler,
    leave_handler, resource_handler,
};
use crate::seen::SeenSet;
use crate::transport::{self, DialTimeouts, TransportEvent};

/// How many random ports to try when no listen port is configured.
const BIND_ATTEMPTS: u32 = 8;

/// Lifecycle of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Result of a single point-to-point send.
#[derive(Debug)]
pub enum SendStatus {
    Delivered,
    Failed(NetworkError),
}

impl SendStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Outcome of a fan-out to every active peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<PeerId>,
}

struct Shared {
    identity: NodeIdentity,
    config: NetworkConfig,
    peers: PeerTable,
    seen: SeenSet,
    dispatcher: RwLock<Dispatcher>,
    resources: ResourceCatalog,
    state: Mutex<NodeState>,
    local_addr: Mutex<Option<SocketAddr>>,
}

// ---------------------------------------------------------------------------
// NodeHandle
// ---------------------------------------------------------------------------

/// Cheap, cloneable reference to a node's shared state.
///
/// Handed to every message handler, so handlers can update peers, forward
/// messages or originate their own.
#[derive(Clone)]
pub struct NodeHandle {
    shared: Arc<Shared>,
}

impl NodeHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.shared.identity.peer_id
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.shared.identity
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.shared.config
    }

    pub fn peers(&self) -> &PeerTable {
        &self.shared.peers
    }

    pub fn seen(&self) -> &SeenSet {
        &self.shared.seen
    }

    pub fn resources(&self) -> &ResourceCatalog {
        &self.shared.resources
    }

    pub fn state(&self) -> NodeState {
        *self.shared.state.lock()
    }

    /// Address the listener is bound to, once the node has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// Peers heard from within the staleness window, sorted by id.
    pub fn list_peers(&self) -> Vec<PeerId> {
        self.shared
            .peers
            .list_active(Utc::now(), self.shared.config.peer_stale_after)
    }

    fn set_state(&self, state: NodeState) {
        *self.shared.state.lock() = state;
    }

    fn ensure_outbound(&self) -> Result<(), NetworkError> {
        match self.state() {
            NodeState::Running | NodeState::Stopping => Ok(()),
            _ => Err(NetworkError::NotRunning),
        }
    }

    fn dial_timeouts(&self) -> DialTimeouts {
        DialTimeouts {
            connect: self.shared.config.connect_timeout,
            write: self.shared.config.write_timeout,
        }
    }

    /// Build a message originated by this node and mark its id as seen, so
    /// copies flooded back to us are dropped.
    fn originate(&self, kind: MessageKind, payload: serde_json::Value, ttl: u32) -> Message {
        let message = Message::with_ttl(self.peer_id().clone(), kind, payload, ttl);
        self.shared.seen.mark_if_new(&message.id, message.timestamp);
        message
    }

    // -- Outbound ----------------------------------------------------------

    /// Send a new message of `kind` to one peer.
    pub async fn send(
        &self,
        peer_id: &PeerId,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Result<SendStatus, NetworkError> {
        self.ensure_outbound()?;
        if !self.shared.peers.contains(peer_id) {
            return Err(NetworkError::UnknownPeer(peer_id.clone()));
        }
        let message = self.originate(kind, payload, self.shared.config.default_ttl);
        self.send_message(peer_id, &message).await
    }

    /// Deliver an already-built message to one peer.
    ///
    /// Transport failures come back as [`SendStatus::Failed`] and count
    /// against the peer; after `max_send_failures` in a row it is dropped.
    pub async fn send_message(
        &self,
        peer_id: &PeerId,
        message: &Message,
    ) -> Result<SendStatus, NetworkError> {
        self.ensure_outbound()?;
        let record = self
            .shared
            .peers
            .get(peer_id)
            .ok_or_else(|| NetworkError::UnknownPeer(peer_id.clone()))?;

        match transport::dial(&record.host, record.port, message, self.dial_timeouts()).await {
            Ok(()) => {
                self.shared.peers.record_success(peer_id, Utc::now());
                Ok(SendStatus::Delivered)
            }
            Err(e) => {
                warn!(
                    "Send of {} {} to {peer_id} at {} failed: {e}",
                    message.kind,
                    message.id,
                    record.address()
                );
                if let Some(failures) = self.shared.peers.record_failure(peer_id) {
                    if failures >= self.shared.config.max_send_failures {
                        self.shared.peers.remove(peer_id);
                        info!("Dropping unreachable peer {peer_id} after {failures} failed sends");
                    }
                }
                Ok(SendStatus::Failed(e))
            }
        }
    }

    /// Originate a message and send it to every active peer.
    pub async fn broadcast(
        &self,
        kind: MessageKind,
        payload: serde_json::Value,
        ttl: Option<u32>,
    ) -> Result<BroadcastReport, NetworkError> {
        self.ensure_outbound()?;
        let ttl = ttl.unwrap_or(self.shared.config.default_ttl);
        let message = self.originate(kind, payload, ttl);
        Ok(self.broadcast_message(&message, &[]).await)
    }

    /// Fan `message` out concurrently to every active peer other than
    /// ourselves and anything in `exclude`.
    pub async fn broadcast_message(&self, message: &Message, exclude: &[&PeerId]) -> BroadcastReport {
        let targets: Vec<PeerId> = self
            .list_peers()
            .into_iter()
            .filter(|p| p != self.peer_id() && !exclude.contains(&p))
            .collect();
        self.fan_out(message, &targets).await
    }

    async fn fan_out(&self, message: &Message, targets: &[PeerId]) -> BroadcastReport {
        let sends = targets.iter().map(|peer_id| async move {
            (peer_id, self.send_message(peer_id, message).await)
        });

        let mut report = BroadcastReport::default();
        for (peer_id, result) in futures::future::join_all(sends).await {
            match result {
                Ok(SendStatus::Delivered) => report.delivered += 1,
                Ok(SendStatus::Failed(_)) => report.failed.push(peer_id.clone()),
                Err(e) => {
                    debug!("Skipped {peer_id} during broadcast: {e}");
                    report.failed.push(peer_id.clone());
                }
            }
        }
        trace!(
            "Broadcast {} {}: {} delivered, {} failed",
            message.kind,
            message.id,
            report.delivered,
            report.failed.len()
        );
        report
    }

    /// Pass an inbound message on with one less hop, skipping its origin and
    /// the relay that handed it to us. Does nothing once the TTL is spent or
    /// the node is shutting down.
    pub async fn forward(&self, message: &Message) -> BroadcastReport {
        if self.ensure_outbound().is_err() {
            return BroadcastReport::default();
        }
        match message.forwarded(self.peer_id()) {
            Some(copy) => {
                self.broadcast_message(&copy, &[&message.sender_id, message.immediate_sender()])
                    .await
            }
            None => {
                trace!("Not forwarding {} {}: ttl exhausted", message.kind, message.id);
                BroadcastReport::default()
            }
        }
    }

    /// Payload advertising this node's reachable address.
    pub fn announce_payload(&self) -> AnnouncePayload {
        let port = self.local_addr().map(|a| a.port()).unwrap_or_default();
        AnnouncePayload::new(
            self.peer_id(),
            self.shared.config.advertised_host(),
            port,
            self.shared.identity.capabilities.clone(),
        )
    }

    /// Send our announce straight to one peer with a single hop.
    pub async fn announce_to(&self, peer_id: &PeerId) -> Result<SendStatus, NetworkError> {
        self.ensure_outbound()?;
        let message = self.originate(
            MessageKind::NodeAnnounce,
            self.announce_payload().into_value(),
            1,
        );
        self.send_message(peer_id, &message).await
    }

    /// Seed the peer table with `bootstrap` and flood our announce.
    pub async fn discover(&self, bootstrap: &[BootstrapPeer]) -> Result<BroadcastReport, NetworkError> {
        self.ensure_outbound()?;
        let now = Utc::now();
        for peer in bootstrap {
            if &peer.peer_id == self.peer_id() {
                continue;
            }
            if self.shared.peers.upsert(&peer.peer_id, &peer.host, peer.port, now) {
                debug!("Seeded bootstrap peer {peer}");
            }
        }
        self.broadcast(
            MessageKind::NodeAnnounce,
            self.announce_payload().into_value(),
            None,
        )
        .await
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<BroadcastReport, NetworkError> {
        self.broadcast(MessageKind::ChatMessage, ChatPayload::new(text).into_value(), None)
            .await
    }

    /// Publish a resource: record it locally and flood a `resource_announce`.
    /// Returns the new resource id with the fan-out report.
    pub async fn share_resource(
        &self,
        resource_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(String, BroadcastReport), NetworkError> {
        self.ensure_outbound()?;
        let payload = ResourceAnnouncePayload::new(resource_type, data);
        let resource_id = payload.resource_id.clone();
        self.shared
            .resources
            .insert(payload.clone().into_resource(self.peer_id().clone()));

        let report = self
            .broadcast(MessageKind::ResourceAnnounce, payload.into_value(), None)
            .await?;
        info!("Shared resource {resource_id} with {} peers", report.delivered);
        Ok((resource_id, report))
    }

    /// Send a `knowledge_update` to `target`, or to every active peer when
    /// no target is given.
    pub async fn share_knowledge(
        &self,
        target: Option<&PeerId>,
        knowledge: KnowledgeUpdatePayload,
    ) -> Result<BroadcastReport, NetworkError> {
        let payload = knowledge.into_value();
        let Some(peer_id) = target else {
            return self
                .broadcast(MessageKind::KnowledgeUpdate, payload, None)
                .await;
        };

        let mut report = BroadcastReport::default();
        match self.send(peer_id, MessageKind::KnowledgeUpdate, payload).await? {
            SendStatus::Delivered => report.delivered = 1,
            SendStatus::Failed(_) => report.failed.push(peer_id.clone()),
        }
        Ok(report)
    }

    /// Re-announce ourselves with a single hop to every known peer, stale
    /// ones included. Delivered announces keep both ends of each link fresh.
    pub async fn announce_presence(&self) -> Result<BroadcastReport, NetworkError> {
        self.ensure_outbound()?;
        let message = self.originate(
            MessageKind::NodeAnnounce,
            self.announce_payload().into_value(),
            1,
        );
        let targets: Vec<PeerId> = self
            .shared
            .peers
            .list_all()
            .into_iter()
            .map(|record| record.peer_id)
            .filter(|p| p != self.peer_id())
            .collect();
        Ok(self.fan_out(&message, &targets).await)
    }

    // -- Inbound -----------------------------------------------------------

    /// Hand a message to the application through the default inbound queue.
    pub fn deliver_local(&self, message: Message) -> DispatchOutcome {
        self.shared.dispatcher.read().enqueue(message)
    }

    /// Run the registered handler for `message`, or queue it if there is none.
    pub async fn dispatch(&self, message: Message) -> DispatchOutcome {
        let handler = self.shared.dispatcher.read().handler_for(&message.kind);
        match handler {
            Some(handler) => router::invoke(handler, message, self.clone()).await,
            None => self.deliver_local(message),
        }
    }

    /// Full inbound path: dedup, refresh the sender, dispatch.
    pub async fn process_inbound(&self, message: Message) -> DispatchOutcome {
        let now = Utc::now();
        if !self.shared.seen.mark_if_new(&message.id, now) {
            debug!("Dropping duplicate {} {}", message.kind, message.id);
            return DispatchOutcome::Duplicate;
        }

        self.shared.peers.touch(&message.sender_id, now);
        if let Some(via) = &message.via {
            self.shared.peers.touch(via, now);
        }

        self.dispatch(message).await
    }

    /// One maintenance pass. Returns the pruned peers and the number of
    /// expired message ids.
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> (Vec<PeerId>, usize) {
        let stale = self
            .shared
            .peers
            .prune_stale(now, self.shared.config.peer_stale_after);
        for peer_id in &stale {
            info!("Pruned stale peer {peer_id}");
        }
        let expired = self.shared.seen.prune(now);
        if expired > 0 {
            debug!("Expired {expired} message ids");
        }
        (stale, expired)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A shot network node.
///
/// Create one per process. Call [`start()`](Node::start) to begin accepting
/// messages and [`discover()`](Node::discover) to join a mesh.
pub struct Node {
    handle: NodeHandle,
    inbox: Option<mpsc::Receiver<Message>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    tasks: JoinSet<()>,
}

impl Node {
    /// Create a node with the built-in protocol handlers installed.
    pub fn new(identity: NodeIdentity, config: NetworkConfig) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));

        let mut dispatcher = Dispatcher::new(inbox_tx);
        dispatcher.register(MessageKind::NodeAnnounce, announce_handler());
        dispatcher.register(MessageKind::ChatMessage, chat_handler());
        dispatcher.register(MessageKind::NodeLeave, leave_handler());
        dispatcher.register(MessageKind::ResourceAnnounce, resource_handler());

        let shared = Shared {
            peers: PeerTable::new(),
            seen: SeenSet::new(config.seen_retention, config.seen_capacity),
            dispatcher: RwLock::new(dispatcher),
            resources: ResourceCatalog::new(config.resource_capacity),
            state: Mutex::new(NodeState::Created),
            local_addr: Mutex::new(None),
            identity,
            config,
        };

        Self {
            handle: NodeHandle {
                shared: Arc::new(shared),
            },
            inbox: Some(inbox_rx),
            shutdown_tx: None,
            tasks: JoinSet::new(),
        }
    }

    /// Node with a fixed id and the given config.
    pub fn named(id: impl Into<String>, config: NetworkConfig) -> Self {
        Self::new(NodeIdentity::named(id), config)
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    pub fn peer_id(&self) -> &PeerId {
        self.handle.peer_id()
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.handle.identity()
    }

    pub fn config(&self) -> &NetworkConfig {
        self.handle.config()
    }

    pub fn state(&self) -> NodeState {
        self.handle.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == NodeState::Running
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.local_addr()
    }

    /// Take the receiving end of the default inbound queue. Only the first
    /// call returns `Some`.
    pub fn take_inbox(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.inbox.take()
    }

    /// Bind `handler` to `kind`, replacing the previous handler (built-ins
    /// included).
    pub fn register_handler(&self, kind: MessageKind, handler: MessageHandler) {
        self.handle.shared.dispatcher.write().register(kind, handler);
    }

    pub fn unregister_handler(&self, kind: &MessageKind) -> bool {
        self.handle.shared.dispatcher.write().unregister(kind)
    }

    pub fn has_handler(&self, kind: &MessageKind) -> bool {
        self.handle.shared.dispatcher.read().has_handler(kind)
    }

    pub fn list_peers(&self) -> Vec<PeerId> {
        self.handle.list_peers()
    }

    /// Snapshot of every peer record.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.handle.peers().list_all()
    }

    pub fn resources(&self) -> &ResourceCatalog {
        self.handle.resources()
    }

    /// Start the node: bind, then spawn the accept, event and maintenance
    /// loops. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, NetworkError> {
        if self.state() == NodeState::Running {
            if let Some(addr) = self.local_addr() {
                return Ok(addr);
            }
        }

        self.handle.set_state(NodeState::Starting);
        let listener = match self.bind_listener().await {
            Ok(listener) => listener,
            Err(e) => {
                self.handle.set_state(NodeState::Stopped);
                return Err(e);
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.handle.set_state(NodeState::Stopped);
                return Err(NetworkError::Bind {
                    addr: self.config().listen_host.clone(),
                    source: e,
                });
            }
        };
        *self.handle.shared.local_addr.lock() = Some(local_addr);

        let (shutdown_tx, _) = broadcast::channel(8);
        let (event_tx, event_rx) = mpsc::channel(256);

        self.tasks.spawn(transport::serve(
            listener,
            event_tx,
            shutdown_tx.subscribe(),
            self.config().read_timeout,
        ));
        self.tasks.spawn(event_loop(
            self.handle.clone(),
            event_rx,
            shutdown_tx.subscribe(),
        ));
        self.tasks.spawn(maintenance_loop(
            self.handle.clone(),
            shutdown_tx.subscribe(),
        ));
        self.shutdown_tx = Some(shutdown_tx);

        self.handle.set_state(NodeState::Running);
        info!("Node {} started on {local_addr}", self.peer_id());
        Ok(local_addr)
    }

    /// Stop the node: tell peers we are leaving, signal the background
    /// tasks and wait for them, all within `shutdown_grace`. Tasks still
    /// running at the deadline are aborted.
    ///
    /// Peers, seen ids and resources are kept for a later `start()`.
    pub async fn stop(&mut self) {
        if self.state() != NodeState::Running {
            return;
        }
        self.handle.set_state(NodeState::Stopping);
        let deadline = tokio::time::Instant::now() + self.config().shutdown_grace;

        let leave = self.handle.originate(
            MessageKind::NodeLeave,
            LeavePayload::new(self.peer_id()).into_value(),
            1,
        );
        match tokio::time::timeout_at(deadline, self.handle.broadcast_message(&leave, &[])).await {
            Ok(report) => debug!(
                "Leave notice: {} delivered, {} failed",
                report.delivered,
                report.failed.len()
            ),
            Err(_) => warn!("Leave notice did not finish before the shutdown deadline"),
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let joined = tokio::time::timeout_at(deadline, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if joined.is_err() {
            warn!("Background tasks missed the shutdown deadline, aborting");
            self.tasks.shutdown().await;
        }

        self.handle.set_state(NodeState::Stopped);
        info!("Node {} stopped", self.peer_id());
    }

    /// Bind the listener. A restart reuses the previous address when the
    /// configured port is ephemeral, so peers keep a valid address for us.
    async fn bind_listener(&self) -> Result<TcpListener, NetworkError> {
        let config = self.config();
        let ephemeral = matches!(config.listen_port, None | Some(0));

        if ephemeral {
            if let Some(previous) = self.local_addr() {
                match transport::listen(previous).await {
                    Ok(listener) => return Ok(listener),
                    Err(e) => warn!("Cannot rebind previous address {previous}: {e}"),
                }
            }
        }

        let mut attempt = 1;
        loop {
            let addr = resolve_listen_addr(&config.listen_host, config.resolve_port()).await?;
            match transport::listen(addr).await {
                Ok(listener) => return Ok(listener),
                Err(e) if config.listen_port.is_none() && attempt < BIND_ATTEMPTS => {
                    debug!("Bind attempt {attempt} on {addr} failed: {e}");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // -- Delegates to the handle -------------------------------------------

    pub async fn send(
        &self,
        peer_id: &PeerId,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Result<SendStatus, NetworkError> {
        self.handle.send(peer_id, kind, payload).await
    }

    pub async fn broadcast(
        &self,
        kind: MessageKind,
        payload: serde_json::Value,
        ttl: Option<u32>,
    ) -> Result<BroadcastReport, NetworkError> {
        self.handle.broadcast(kind, payload, ttl).await
    }

    pub async fn discover(&self, bootstrap: &[BootstrapPeer]) -> Result<BroadcastReport, NetworkError> {
        self.handle.discover(bootstrap).await
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<BroadcastReport, NetworkError> {
        self.handle.send_chat(text).await
    }

    pub async fn share_resource(
        &self,
        resource_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(String, BroadcastReport), NetworkError> {
        self.handle.share_resource(resource_type, data).await
    }

    pub async fn share_knowledge(
        &self,
        target: Option<&PeerId>,
        knowledge: KnowledgeUpdatePayload,
    ) -> Result<BroadcastReport, NetworkError> {
        self.handle.share_knowledge(target, knowledge).await
    }
}

async fn resolve_listen_addr(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    let bind_err = |source| NetworkError::Bind {
        addr: format!("{host}:{port}"),
        source,
    };
    let mut addrs = tokio::net::lookup_host((host, port)).await.map_err(bind_err)?;
    addrs.next().ok_or_else(|| {
        bind_err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "host resolved to no addresses",
        ))
    })
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Receives decoded messages from the accept loop and processes each one in
/// its own task, at most `max_inflight` at a time. In-flight processing is
/// cancelled on shutdown.
async fn event_loop(
    node: NodeHandle,
    mut events: mpsc::Receiver<TransportEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut inflight = JoinSet::new();
    let limit = node.config().max_inflight.max(1);

    loop {
        tokio::select! {
            // At the limit, frames wait in the channel until a task finishes.
            Some(event) = events.recv(), if inflight.len() < limit => {
                let TransportEvent::Message { from_addr, message } = event;
                trace!("Processing {} {} from {from_addr}", message.kind, message.id);
                let node = node.clone();
                inflight.spawn(async move {
                    node.process_inbound(message).await;
                });
            }
            Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
            _ = shutdown.recv() => {
                debug!("Event loop shutting down");
                break;
            }
        }
    }

    inflight.shutdown().await;
}

/// Periodically re-announces us (or retries the bootstrap peers while we
/// know nobody), then prunes stale peers and expired message ids.
async fn maintenance_loop(node: NodeHandle, mut shutdown: broadcast::Receiver<()>) {
    let period = node
        .config()
        .maintenance_interval
        .max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;
    let mut last_bootstrap: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let bootstrap = &node.config().bootstrap_peers;
                let retry_due = last_bootstrap
                    .is_none_or(|at: Instant| at.elapsed() >= node.config().bootstrap_retry);

                if node.peers().is_empty() && !bootstrap.is_empty() {
                    if retry_due {
                        last_bootstrap = Some(Instant::now());
                        info!("No known peers, retrying {} bootstrap peers", bootstrap.len());
                        if let Err(e) = node.discover(bootstrap).await {
                            debug!("Bootstrap retry skipped: {e}");
                        }
                    }
                } else if let Err(e) = node.announce_presence().await {
                    debug!("Presence announce skipped: {e}");
                }

                node.run_maintenance(Utc::now());
            }
            _ = shutdown.recv() => {
                debug!("Maintenance loop shutting down");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
