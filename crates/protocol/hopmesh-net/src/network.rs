//! Network facade.
//!
//! A [`Network`] owns the local identity, the topology and the transports.
//! It turns topology events into [`Node`] handles and [`NetworkEvent`]s so
//! applications never deal with gossip or negotiation.
//!
//! # Example
//!
//! ```no_run
//! use hopmesh_net::{Network, NetworkConfig, NetworkEvent, TcpTransport};
//!
//! # async fn example() -> hopmesh_net::NetworkResult<()> {
//! let network = Network::new(NetworkConfig::default().with_name("lab"));
//! network
//!     .add_transport(TcpTransport::new().with_listen_addr("0.0.0.0:7000".parse().unwrap()))
//!     .await?;
//! network.join().await?;
//!
//! let mut events = network.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let NetworkEvent::NodeAvailable(id) = event {
//!         network.send(id, "hello", &"hi there").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use futures::future::join_all;
use hopmesh_types::NodeId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::event::{NetworkEvent, NodeEvent, TopologyEvent};
use crate::message::Message;
use crate::topology::Topology;
use crate::transport::{PeerConnector, Transport, TransportOptions};

/// Capacity of the network and node event channels.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type NodeMap = Arc<RwLock<HashMap<NodeId, Node>>>;

/// Handle to a joined (or joinable) mesh network.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

struct NetworkInner {
    id: NodeId,
    config: NetworkConfig,
    topology: Topology,
    /// Transports; the lock also serialises join, leave and add_transport.
    transports: Mutex<Vec<Arc<dyn Transport>>>,
    joined: AtomicBool,
    nodes: NodeMap,
    events: broadcast::Sender<NetworkEvent>,
    pump: AbortHandle,
}

impl Drop for NetworkInner {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("joined", &self.is_joined())
            .finish()
    }
}

impl Network {
    /// Create a network with a freshly generated node id.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: NetworkConfig) -> Self {
        Self::with_id(NodeId::generate(), config)
    }

    /// Create a network with a given node id.
    pub fn with_id(id: NodeId, config: NetworkConfig) -> Self {
        let topology = Topology::new(id, config.topology.clone());
        let nodes: NodeMap = Arc::new(RwLock::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let pump = tokio::spawn(pump_events(
            topology.clone(),
            topology.subscribe(),
            nodes.clone(),
            events.clone(),
        ))
        .abort_handle();

        debug!(node = %id, network = %config.name, "Created network");
        Self {
            inner: Arc::new(NetworkInner {
                id,
                config,
                topology,
                transports: Mutex::new(Vec::new()),
                joined: AtomicBool::new(false),
                nodes,
                events,
                pump,
            }),
        }
    }

    /// Id of the local node.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The network configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    /// The underlying topology.
    pub fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    /// Whether [`join`](Self::join) succeeded and [`leave`](Self::leave)
    /// has not been called since.
    pub fn is_joined(&self) -> bool {
        self.inner.joined.load(Ordering::SeqCst)
    }

    fn transport_options(&self) -> TransportOptions {
        let config = &self.inner.config;
        TransportOptions {
            network_id: self.inner.id,
            network_name: config.name.clone(),
            endpoint: config.topology.endpoint,
            auth: config.auth.clone(),
            capabilities: config.capabilities.clone(),
            peer_config: config.peer.clone(),
            connector: PeerConnector::new(self.inner.topology.clone()),
        }
    }

    /// Add a transport. It is started right away if the network is joined.
    pub async fn add_transport(&self, transport: impl Transport + 'static) -> NetworkResult<()> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let mut transports = self.inner.transports.lock().await;
        if self.is_joined() {
            transport.start(self.transport_options()).await?;
        }
        transports.push(transport);
        Ok(())
    }

    /// Start the topology, then all transports. Joining twice is a no-op.
    ///
    /// # Errors
    /// If any transport fails to start, the topology is stopped again and
    /// the first error is returned.
    pub async fn join(&self) -> NetworkResult<()> {
        let transports = self.inner.transports.lock().await;
        if self.is_joined() {
            return Ok(());
        }

        self.inner.topology.start().await?;
        let options = self.transport_options();
        let results = join_all(transports.iter().map(|t| t.start(options.clone()))).await;
        if let Some(e) = results.into_iter().find_map(Result::err) {
            warn!(node = %self.inner.id, error = %e, "Transport failed to start");
            join_all(transports.iter().map(|t| t.stop())).await;
            if let Err(stop_error) = self.inner.topology.stop().await {
                debug!(error = %stop_error, "Failed to stop topology");
            }
            return Err(e);
        }

        self.inner.joined.store(true, Ordering::SeqCst);
        info!(node = %self.inner.id, network = %self.inner.config.name, "Joined network");
        Ok(())
    }

    /// Stop the topology, then all transports. Leaving twice is a no-op.
    pub async fn leave(&self) -> NetworkResult<()> {
        let transports = self.inner.transports.lock().await;
        if !self.is_joined() {
            return Ok(());
        }
        self.inner.joined.store(false, Ordering::SeqCst);

        self.inner.topology.stop().await?;
        for result in join_all(transports.iter().map(|t| t.stop())).await {
            if let Err(e) = result {
                warn!(node = %self.inner.id, error = %e, "Transport failed to stop");
            }
        }
        info!(node = %self.inner.id, "Left network");
        Ok(())
    }

    /// Handles of all currently reachable nodes, sorted by id.
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .inner
            .nodes
            .read()
            .map(|nodes| nodes.values().cloned().collect())
            .unwrap_or_default();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Handle of a reachable node.
    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.inner
            .nodes
            .read()
            .ok()
            .and_then(|nodes| nodes.get(id).cloned())
    }

    /// Subscribe to network events.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.events.subscribe()
    }

    /// Send a CBOR-encoded payload to `target` and wait for its
    /// acknowledgement.
    pub async fn send<T: Serialize>(
        &self,
        target: NodeId,
        message_type: impl Into<String>,
        payload: &T,
    ) -> NetworkResult<()> {
        let data = hopmesh_wire::encode_payload(payload)?;
        self.send_raw(target, message_type, data).await
    }

    /// Send raw bytes to `target` and wait for its acknowledgement.
    pub async fn send_raw(
        &self,
        target: NodeId,
        message_type: impl Into<String>,
        data: Vec<u8>,
    ) -> NetworkResult<()> {
        if !self.is_joined() {
            return Err(NetworkError::NotJoined);
        }
        self.inner.topology.send(target, message_type, data).await
    }

    /// Send a payload to every reachable node.
    ///
    /// Individual failures are logged, not returned.
    pub async fn broadcast<T: Serialize>(
        &self,
        message_type: impl Into<String>,
        payload: &T,
    ) -> NetworkResult<()> {
        if !self.is_joined() {
            return Err(NetworkError::NotJoined);
        }
        let message_type = message_type.into();
        let data = hopmesh_wire::encode_payload(payload)?;

        let nodes = self.nodes();
        let sends = nodes
            .iter()
            .map(|node| node.send_raw(message_type.clone(), data.clone()));
        for (node, result) in nodes.iter().zip(join_all(sends).await) {
            if let Err(e) = result {
                debug!(target = %node.id(), error = %e, "Broadcast send failed");
            }
        }
        Ok(())
    }
}

/// Mirror topology events into node handles and network events.
async fn pump_events(
    topology: Topology,
    mut topology_events: broadcast::Receiver<TopologyEvent>,
    nodes: NodeMap,
    events: broadcast::Sender<NetworkEvent>,
) {
    loop {
        let event = match topology_events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Network event pump lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            TopologyEvent::NodeAvailable(id) => {
                if let Ok(mut nodes) = nodes.write() {
                    nodes
                        .entry(id)
                        .or_insert_with(|| Node::new(id, topology.clone()));
                }
                let _ = events.send(NetworkEvent::NodeAvailable(id));
            }

            TopologyEvent::NodeUnavailable(id) => {
                let node = nodes.write().ok().and_then(|mut nodes| nodes.remove(&id));
                if let Some(node) = node {
                    let _ = node.events.send(NodeEvent::Unavailable);
                }
                let _ = events.send(NetworkEvent::NodeUnavailable(id));
            }

            TopologyEvent::Data {
                source,
                message_type,
                data,
            } => {
                let message = Message {
                    source,
                    message_type,
                    data,
                };
                let node = nodes.read().ok().and_then(|nodes| nodes.get(&source).cloned());
                if let Some(node) = node {
                    let _ = node.events.send(NodeEvent::Message(message.clone()));
                }
                let _ = events.send(NetworkEvent::Message(message));
            }
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// Handle to a reachable node.
///
/// A handle stays usable after the node becomes unavailable; sends then fail
/// with `NotReachable` until it is reachable again.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    topology: Topology,
    events: broadcast::Sender<NodeEvent>,
}

impl Node {
    fn new(id: NodeId, topology: Topology) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id,
            topology,
            events,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Send a CBOR-encoded payload to this node.
    pub async fn send<T: Serialize>(
        &self,
        message_type: impl Into<String>,
        payload: &T,
    ) -> NetworkResult<()> {
        let data = hopmesh_wire::encode_payload(payload)?;
        self.send_raw(message_type, data).await
    }

    /// Send raw bytes to this node.
    pub async fn send_raw(&self, message_type: impl Into<String>, data: Vec<u8>) -> NetworkResult<()> {
        self.topology.send(self.id, message_type, data).await
    }

    /// Summed edge cost of the current route, in milliseconds.
    pub async fn latency(&self) -> NetworkResult<Option<u64>> {
        self.topology.latency_to(self.id).await
    }

    /// Nodes the route passes through, starting with the local node.
    pub async fn path(&self) -> NetworkResult<Option<Vec<NodeId>>> {
        self.topology.path_to(self.id).await
    }

    /// Subscribe to messages from this node and its unavailability.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTransport {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn start(&self, _options: TransportOptions) -> NetworkResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NetworkError::Transport("refused".to_string()));
            }
            Ok(())
        }

        async fn stop(&self) -> NetworkResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let network = Network::new(NetworkConfig::default());
        let transport = CountingTransport::default();
        let starts = transport.starts.clone();
        network.add_transport(transport).await.unwrap();

        network.join().await.unwrap();
        network.join().await.unwrap();
        assert!(network.is_joined());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let network = Network::new(NetworkConfig::default());
        let transport = CountingTransport::default();
        let stops = transport.stops.clone();
        network.add_transport(transport).await.unwrap();

        network.leave().await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        network.join().await.unwrap();
        network.leave().await.unwrap();
        network.leave().await.unwrap();
        assert!(!network.is_joined());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_transport_aborts_join() {
        let network = Network::new(NetworkConfig::default());
        network.add_transport(CountingTransport::default()).await.unwrap();
        network
            .add_transport(CountingTransport {
                fail: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let result = network.join().await;
        assert!(matches!(result, Err(NetworkError::Transport(_))));
        assert!(!network.is_joined());
    }

    #[tokio::test]
    async fn test_transport_added_after_join_starts() {
        let network = Network::new(NetworkConfig::default());
        network.join().await.unwrap();

        let transport = CountingTransport::default();
        let starts = transport.starts.clone();
        network.add_transport(transport).await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_requires_join() {
        let network = Network::new(NetworkConfig::default());
        let result = network.send(NodeId::generate(), "x", &1u32).await;
        assert!(matches!(result, Err(NetworkError::NotJoined)));
        let result = network.broadcast("x", &1u32).await;
        assert!(matches!(result, Err(NetworkError::NotJoined)));
    }

    #[tokio::test]
    async fn test_send_to_unknown_node() {
        let network = Network::new(NetworkConfig::default());
        network.join().await.unwrap();
        let target = NodeId::generate();
        let result = network.send(target, "x", &1u32).await;
        assert!(matches!(result, Err(NetworkError::NotReachable(id)) if id == target));
    }

    #[tokio::test]
    async fn test_broadcast_without_nodes_succeeds() {
        let network = Network::new(NetworkConfig::default());
        network.join().await.unwrap();
        network.broadcast("x", &"hello").await.unwrap();
        assert!(network.nodes().is_empty());
    }
}
