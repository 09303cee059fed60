//! Topology, routing and messaging.
//!
//! A [`Topology`] is a cheap, cloneable handle to an actor task that owns
//! everything shared between connections:
//!
//! - the graph of known nodes and their edges
//! - the shortest-path routing table
//! - the registry of directly connected peers
//! - gossip state and the debounced routing broadcast
//! - the pending-send table of point-to-point messaging
//!
//! All mutation happens inside the actor; handle methods send a command and
//! await the reply. Peer connections are registered with
//! [`Topology::add_peer`], after which their events are drained into the
//! actor by a small forwarding task per connection.

mod gossip;
mod graph;
mod messaging;
mod routing;

use hopmesh_types::NodeId;
use hopmesh_wire::PeerMessage;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::config::TopologyConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::event::TopologyEvent;
use crate::peer::{DisconnectReason, Peer, PeerConnection, PeerEvent, PeerKey};
use crate::timer::{sleep_until_opt, tick_opt};
use graph::Graph;
use messaging::Messaging;
use routing::RoutingTable;

/// Capacity of the topology event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Commands
// =============================================================================

/// Commands sent from [`Topology`] handles to the actor.
enum TopologyCommand {
    /// Enable gossip and broadcasts.
    Start { response: oneshot::Sender<()> },

    /// Disable gossip, disconnect all peers and fail pending sends.
    Stop { response: oneshot::Sender<()> },

    /// Register a new connection.
    AddPeer { connection: PeerConnection },

    /// Send application data; the reply arrives on ack, reject or timeout.
    Send {
        target: NodeId,
        message_type: String,
        data: Vec<u8>,
        response: oneshot::Sender<NetworkResult<()>>,
    },

    /// Direct peer used as the next hop towards a node.
    FindPeer {
        target: NodeId,
        response: oneshot::Sender<Option<Peer>>,
    },

    /// Nodes from the local node up to, excluding, the target.
    PathTo {
        target: NodeId,
        response: oneshot::Sender<Option<Vec<NodeId>>>,
    },

    /// Cumulative route cost to a node.
    LatencyTo {
        target: NodeId,
        response: oneshot::Sender<Option<u64>>,
    },

    /// Currently reachable nodes.
    Nodes { response: oneshot::Sender<Vec<NodeId>> },

    /// Recompute routes now.
    RefreshRouting { response: oneshot::Sender<()> },

    /// Fire any pending broadcast now and recompute routes.
    Consolidate { response: oneshot::Sender<()> },
}

/// Events produced inside the topology itself.
#[derive(Debug)]
enum Internal {
    /// An event of a registered connection.
    Peer { key: PeerKey, event: PeerEvent },

    /// A pending send ran out of time.
    SendTimeout { id: u64 },
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to the topology actor.
///
/// Dropping the last handle stops the actor and disconnects its peers.
#[derive(Debug, Clone)]
pub struct Topology {
    local_id: NodeId,
    command_tx: mpsc::Sender<TopologyCommand>,
    events: broadcast::Sender<TopologyEvent>,
    rounds: watch::Receiver<u64>,
}

impl std::fmt::Debug for TopologyCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start { .. } => "Start",
            Self::Stop { .. } => "Stop",
            Self::AddPeer { .. } => "AddPeer",
            Self::Send { .. } => "Send",
            Self::FindPeer { .. } => "FindPeer",
            Self::PathTo { .. } => "PathTo",
            Self::LatencyTo { .. } => "LatencyTo",
            Self::Nodes { .. } => "Nodes",
            Self::RefreshRouting { .. } => "RefreshRouting",
            Self::Consolidate { .. } => "Consolidate",
        };
        f.write_str(name)
    }
}

impl Topology {
    /// Spawn a topology actor for `local_id`.
    ///
    /// Must be called within a Tokio runtime. The topology accepts peers
    /// right away but only gossips once [`start`](Self::start)ed.
    pub fn new(local_id: NodeId, config: TopologyConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (rounds_tx, rounds) = watch::channel(0);

        let actor = TopologyActor::new(local_id, config, internal_tx, events.clone(), rounds_tx);
        tokio::spawn(actor.run(command_rx, internal_rx));

        Self {
            local_id,
            command_tx,
            events,
            rounds,
        }
    }

    /// Id of the local node.
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Subscribe to availability and data events.
    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.events.subscribe()
    }

    /// Counter bumped every time a debounced routing broadcast fires.
    pub fn broadcast_rounds(&self) -> watch::Receiver<u64> {
        self.rounds.clone()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> TopologyCommand,
    ) -> NetworkResult<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(command(tx))
            .await
            .map_err(|_| NetworkError::ChannelClosed)?;
        rx.await.map_err(|_| NetworkError::ChannelClosed)
    }

    /// Enable latency gossip and routing broadcasts.
    pub async fn start(&self) -> NetworkResult<()> {
        self.request(|response| TopologyCommand::Start { response })
            .await
    }

    /// Disable gossip, disconnect all peers and fail pending sends.
    pub async fn stop(&self) -> NetworkResult<()> {
        self.request(|response| TopologyCommand::Stop { response })
            .await
    }

    /// Register a connection. Its node becomes a direct neighbor once the
    /// connection is active.
    pub async fn add_peer(&self, connection: PeerConnection) -> NetworkResult<()> {
        self.command_tx
            .send(TopologyCommand::AddPeer { connection })
            .await
            .map_err(|_| NetworkError::ChannelClosed)
    }

    /// Send application data to `target` and wait for its acknowledgement.
    ///
    /// # Errors
    /// - `NotReachable` if no route is known right now
    /// - `CouldNotForward` if a node on the path rejected the message
    /// - `Timeout` if neither ack nor reject arrived in time
    pub async fn send(
        &self,
        target: NodeId,
        message_type: impl Into<String>,
        data: Vec<u8>,
    ) -> NetworkResult<()> {
        let message_type = message_type.into();
        self.request(|response| TopologyCommand::Send {
            target,
            message_type,
            data,
            response,
        })
        .await?
    }

    /// The direct peer used as the next hop towards `target`.
    pub async fn find_peer(&self, target: NodeId) -> NetworkResult<Option<Peer>> {
        self.request(|response| TopologyCommand::FindPeer { target, response })
            .await
    }

    /// Nodes from the local node up to, excluding, `target`.
    ///
    /// A directly connected target yields just the local node.
    pub async fn path_to(&self, target: NodeId) -> NetworkResult<Option<Vec<NodeId>>> {
        self.request(|response| TopologyCommand::PathTo { target, response })
            .await
    }

    /// Summed edge cost of the route to `target`, in milliseconds.
    pub async fn latency_to(&self, target: NodeId) -> NetworkResult<Option<u64>> {
        self.request(|response| TopologyCommand::LatencyTo { target, response })
            .await
    }

    /// Ids of all reachable nodes, sorted.
    pub async fn nodes(&self) -> NetworkResult<Vec<NodeId>> {
        self.request(|response| TopologyCommand::Nodes { response })
            .await
    }

    /// Recompute routes, emitting availability changes.
    pub async fn refresh_routing(&self) -> NetworkResult<()> {
        self.request(|response| TopologyCommand::RefreshRouting { response })
            .await
    }

    /// Fire a pending routing broadcast without waiting for the debounce
    /// delay, then recompute routes.
    pub async fn consolidate(&self) -> NetworkResult<()> {
        self.request(|response| TopologyCommand::Consolidate { response })
            .await
    }
}

// =============================================================================
// Actor
// =============================================================================

/// A registered connection.
struct PeerEntry {
    peer: Peer,
    /// Remote id, set once the connection is active.
    id: Option<NodeId>,
}

/// Owner of all topology state.
struct TopologyActor {
    config: TopologyConfig,
    graph: Graph,
    routing: RoutingTable,
    /// Routes must be recomputed before the next query.
    dirty: bool,
    /// Nodes reachable at the last recompute.
    available: HashSet<NodeId>,
    peers: HashMap<PeerKey, PeerEntry>,
    /// Connection keys per directly connected node.
    direct: HashMap<NodeId, Vec<PeerKey>>,
    started: bool,
    broadcast_deadline: Option<Instant>,
    gossip_timer: Option<Interval>,
    messaging: Messaging,
    internal_tx: mpsc::UnboundedSender<Internal>,
    events: broadcast::Sender<TopologyEvent>,
    rounds: watch::Sender<u64>,
}

impl TopologyActor {
    fn new(
        local_id: NodeId,
        config: TopologyConfig,
        internal_tx: mpsc::UnboundedSender<Internal>,
        events: broadcast::Sender<TopologyEvent>,
        rounds: watch::Sender<u64>,
    ) -> Self {
        Self {
            config,
            graph: Graph::new(local_id),
            routing: RoutingTable::default(),
            dirty: false,
            available: HashSet::new(),
            peers: HashMap::new(),
            direct: HashMap::new(),
            started: false,
            broadcast_deadline: None,
            gossip_timer: None,
            messaging: Messaging::default(),
            internal_tx,
            events,
            rounds,
        }
    }

    fn self_id(&self) -> NodeId {
        self.graph.self_id()
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<TopologyCommand>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        debug!(node = %self.self_id(), "Topology started");
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                Some(internal) = internal_rx.recv() => self.handle_internal(internal),

                _ = sleep_until_opt(self.broadcast_deadline) => self.fire_broadcast(),

                _ = tick_opt(&mut self.gossip_timer) => self.gossip_latency(),
            }
        }
        self.shutdown();
        debug!(node = %self.self_id(), "Topology stopped");
    }

    fn handle_command(&mut self, command: TopologyCommand) {
        trace!(command = ?command, "Topology command");
        match command {
            TopologyCommand::Start { response } => {
                self.start();
                let _ = response.send(());
            }

            TopologyCommand::Stop { response } => {
                self.shutdown();
                let _ = response.send(());
            }

            TopologyCommand::AddPeer { connection } => self.add_peer(connection),

            TopologyCommand::Send {
                target,
                message_type,
                data,
                response,
            } => self.send_data(target, message_type, data, response),

            TopologyCommand::FindPeer { target, response } => {
                let peer = self.find_peer(&target).cloned();
                let _ = response.send(peer);
            }

            TopologyCommand::PathTo { target, response } => {
                self.ensure_routing();
                let _ = response.send(self.routing.path_to(&self.graph, &target));
            }

            TopologyCommand::LatencyTo { target, response } => {
                self.ensure_routing();
                let _ = response.send(self.routing.route(&target).map(|route| route.cost));
            }

            TopologyCommand::Nodes { response } => {
                self.ensure_routing();
                let _ = response.send(self.routing.reachable());
            }

            TopologyCommand::RefreshRouting { response } => {
                self.refresh_routing();
                let _ = response.send(());
            }

            TopologyCommand::Consolidate { response } => {
                if self.broadcast_deadline.is_some() {
                    self.fire_broadcast();
                }
                self.refresh_routing();
                let _ = response.send(());
            }
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Peer { key, event } => match event {
                PeerEvent::Connected(id) => self.on_peer_connected(key, id),
                PeerEvent::Disconnected(reason) => self.on_peer_disconnected(key, reason),
                PeerEvent::Message(message) => self.on_peer_message(key, message),
            },
            Internal::SendTimeout { id } => self.on_send_timeout(id),
        }
    }

    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let jitter_ms = self.config.max_start_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::random::<u64>() % jitter_ms)
        };
        let mut timer = interval_at(
            Instant::now() + jitter + self.config.latency_gossip_interval,
            self.config.latency_gossip_interval,
        );
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.gossip_timer = Some(timer);

        if self.dirty {
            self.schedule_broadcast();
        }
        info!(node = %self.self_id(), "Topology joined");
    }

    /// Stop gossiping, drop every connection and fail outstanding sends.
    fn shutdown(&mut self) {
        self.started = false;
        self.gossip_timer = None;
        self.broadcast_deadline = None;

        for entry in self.peers.values() {
            entry.peer.disconnect(DisconnectReason::Manual);
        }
        self.messaging.clear();
    }

    // =========================================================================
    // Peers
    // =========================================================================

    fn add_peer(&mut self, connection: PeerConnection) {
        let PeerConnection { peer, mut events } = connection;
        let key = peer.key();
        debug!(peer = ?key, "Registering peer");
        self.peers.insert(key, PeerEntry { peer, id: None });

        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if internal_tx.send(Internal::Peer { key, event }).is_err() {
                    break;
                }
            }
        });
    }

    fn on_peer_connected(&mut self, key: PeerKey, id: NodeId) {
        let Some(entry) = self.peers.get_mut(&key) else {
            return;
        };
        entry.id = Some(id);
        info!(node = %self.graph.self_id(), peer = %id, "Peer connected");

        self.direct.entry(id).or_default().push(key);
        self.graph.get_or_create(id).direct = true;
        self.dirty = true;
        self.refresh_self_edges();
        self.schedule_broadcast();
    }

    fn on_peer_disconnected(&mut self, key: PeerKey, reason: DisconnectReason) {
        let Some(entry) = self.peers.remove(&key) else {
            return;
        };
        let Some(id) = entry.id else {
            debug!(peer = ?key, reason = %reason, "Peer failed before connecting");
            return;
        };
        info!(node = %self.self_id(), peer = %id, reason = %reason, "Peer disconnected");

        let last = match self.direct.get_mut(&id) {
            Some(keys) => {
                keys.retain(|k| *k != key);
                keys.is_empty()
            }
            None => true,
        };
        if last {
            self.direct.remove(&id);
            if let Some(node) = self.graph.get_mut(&id) {
                node.direct = false;
            }
            self.graph.remove_routing(&id);
        }
        self.refresh_self_edges();
        self.dirty = true;
        self.schedule_broadcast();
    }

    fn on_peer_message(&mut self, key: PeerKey, message: PeerMessage) {
        match message {
            PeerMessage::NodeSummary(summary) => self.on_node_summary(key, summary),
            PeerMessage::NodeRequest(request) => self.on_node_request(key, request),
            PeerMessage::NodeDetails(details) => self.on_node_details(details),
            PeerMessage::Data(data) => self.on_data(key, data),
            PeerMessage::DataAck(ack) => self.on_data_ack(ack.id),
            PeerMessage::DataReject(reject) => self.on_data_reject(reject.id),
            other => trace!(peer = ?key, message = ?other.message_type(), "Ignoring message"),
        }
    }

    /// Node id of a registered, active connection.
    fn peer_node(&self, key: PeerKey) -> Option<NodeId> {
        self.peers.get(&key).and_then(|entry| entry.id)
    }

    /// Queue a message on a registered connection, logging failures.
    fn post(&self, key: PeerKey, message: PeerMessage) {
        let Some(entry) = self.peers.get(&key) else {
            debug!(peer = ?key, "Dropping message for unknown peer");
            return;
        };
        if let Err(e) = entry.peer.post(message) {
            debug!(peer = ?key, error = %e, "Failed to queue message");
        }
    }

    /// An active connection to a directly connected node.
    fn direct_peer(&self, id: &NodeId) -> Option<&Peer> {
        self.direct
            .get(id)?
            .iter()
            .filter_map(|key| self.peers.get(key))
            .map(|entry| &entry.peer)
            .find(|peer| peer.is_connected())
    }

    /// Rebuild the local node's edges from the connected peers.
    ///
    /// Edge cost is the peer's mean latency; a peer without samples yet
    /// costs 0. Any change bumps the local version.
    fn refresh_self_edges(&mut self) -> bool {
        let neighbors: Vec<(NodeId, u32)> = self
            .direct
            .iter()
            .map(|(id, keys)| {
                let cost = keys
                    .iter()
                    .filter_map(|key| self.peers.get(key))
                    .filter_map(|entry| entry.peer.latency().ok())
                    .min()
                    .unwrap_or(0);
                (*id, cost)
            })
            .collect();

        let self_id = self.self_id();
        let changed = self.graph.set_edges(self_id, neighbors);
        if changed {
            self.graph.local_mut().version += 1;
            self.dirty = true;
        }
        changed
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Recompute routes if anything changed since the last recompute.
    fn ensure_routing(&mut self) {
        if self.dirty {
            self.refresh_routing();
        }
    }

    /// Recompute routes and emit availability transitions.
    fn refresh_routing(&mut self) {
        self.dirty = false;
        let pruned = self.graph.prune();
        if !pruned.is_empty() {
            trace!(count = pruned.len(), "Pruned unreferenced nodes");
        }

        self.routing = RoutingTable::compute(&self.graph);
        let reachable: HashSet<NodeId> = self.routing.reachable().into_iter().collect();

        let self_id = self.self_id();
        for node in self.graph.nodes_mut() {
            if node.id != self_id && !reachable.contains(&node.id) {
                // re-sync on next contact
                node.version = 0;
            }
        }

        let mut lost: Vec<NodeId> = self.available.difference(&reachable).copied().collect();
        let mut found: Vec<NodeId> = reachable.difference(&self.available).copied().collect();
        lost.sort();
        found.sort();
        self.available = reachable;

        for id in lost {
            debug!(node = %self_id, target = %id, "Node unavailable");
            let _ = self.events.send(TopologyEvent::NodeUnavailable(id));
        }
        for id in found {
            debug!(node = %self_id, target = %id, "Node available");
            let _ = self.events.send(TopologyEvent::NodeAvailable(id));
        }
    }

    /// The direct peer to hand messages for `target` to.
    fn find_peer(&mut self, target: &NodeId) -> Option<&Peer> {
        self.ensure_routing();
        let next_hop = self.routing.route(target)?.next_hop;
        self.direct_peer(&next_hop)
    }

    // =========================================================================
    // Broadcast debounce
    // =========================================================================

    /// Arm the broadcast timer unless one is already pending.
    fn schedule_broadcast(&mut self) {
        if !self.started || self.broadcast_deadline.is_some() {
            return;
        }
        self.broadcast_deadline = Some(Instant::now() + self.config.broadcast_delay);
    }

    /// Recompute routes and send a node summary to every connected peer.
    fn fire_broadcast(&mut self) {
        self.broadcast_deadline = None;
        self.refresh_routing();

        if !self.config.endpoint {
            let summary = self.build_summary();
            let mut sent = 0;
            for (key, entry) in &self.peers {
                if entry.id.is_none() {
                    continue;
                }
                match entry
                    .peer
                    .post(PeerMessage::NodeSummary(summary.clone()))
                {
                    Ok(()) => sent += 1,
                    Err(e) => debug!(peer = ?key, error = %e, "Failed to queue summary"),
                }
            }
            trace!(
                node = %self.self_id(),
                peers = sent,
                nodes = summary.nodes.len(),
                "Broadcast node summary"
            );
        }

        self.rounds.send_modify(|round| *round += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{PeerOptions, Role};

    fn config() -> TopologyConfig {
        TopologyConfig {
            max_start_jitter: Duration::ZERO,
            ..TopologyConfig::default()
        }
    }

    /// Two topologies joined by a forced in-memory connection.
    async fn linked(a: &Topology, b: &Topology) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let a_conn = Peer::spawn_connected(left, PeerOptions::new(a.local_id(), Role::Client), b.local_id());
        let b_conn = Peer::spawn_connected(right, PeerOptions::new(b.local_id(), Role::Server), a.local_id());
        a.add_peer(a_conn).await.unwrap();
        b.add_peer(b_conn).await.unwrap();
    }

    async fn settle(topologies: &[&Topology]) {
        for _ in 0..10 {
            for topology in topologies {
                topology.consolidate().await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_empty_topology() {
        let topology = Topology::new(NodeId::generate(), config());
        topology.start().await.unwrap();
        assert!(topology.nodes().await.unwrap().is_empty());
        assert!(topology.path_to(NodeId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_direct_peer_is_available() {
        let a = Topology::new(NodeId::generate(), config());
        let b = Topology::new(NodeId::generate(), config());
        a.start().await.unwrap();
        b.start().await.unwrap();
        let mut events = a.subscribe();

        linked(&a, &b).await;
        settle(&[&a, &b]).await;

        assert_eq!(a.nodes().await.unwrap(), vec![b.local_id()]);
        assert_eq!(b.nodes().await.unwrap(), vec![a.local_id()]);
        assert_eq!(a.path_to(b.local_id()).await.unwrap(), Some(vec![a.local_id()]));
        assert_eq!(a.latency_to(b.local_id()).await.unwrap(), Some(0));
        assert_eq!(
            events.recv().await.unwrap(),
            TopologyEvent::NodeAvailable(b.local_id())
        );

        let peer = a.find_peer(b.local_id()).await.unwrap().unwrap();
        assert_eq!(peer.id(), Some(b.local_id()));
    }

    #[tokio::test]
    async fn test_broadcast_rounds_advance() {
        let a = Topology::new(NodeId::generate(), config());
        let b = Topology::new(NodeId::generate(), config());
        a.start().await.unwrap();
        b.start().await.unwrap();
        let rounds = a.broadcast_rounds();
        let before = *rounds.borrow();

        linked(&a, &b).await;
        settle(&[&a, &b]).await;
        assert!(*rounds.borrow() > before);
    }

    #[tokio::test]
    async fn test_stop_disconnects_peers() {
        let a = Topology::new(NodeId::generate(), config());
        let b = Topology::new(NodeId::generate(), config());
        a.start().await.unwrap();
        b.start().await.unwrap();
        let mut events = b.subscribe();

        linked(&a, &b).await;
        settle(&[&a, &b]).await;
        assert!(matches!(events.recv().await.unwrap(), TopologyEvent::NodeAvailable(_)));

        a.stop().await.unwrap();
        settle(&[&a, &b]).await;
        assert!(b.nodes().await.unwrap().is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            TopologyEvent::NodeUnavailable(a.local_id())
        );
    }

    #[tokio::test]
    async fn test_send_to_self_is_not_reachable() {
        let id = NodeId::generate();
        let topology = Topology::new(id, config());
        let result = topology.send(id, "x", vec![]).await;
        assert!(matches!(result, Err(NetworkError::NotReachable(target)) if target == id));
    }
}
