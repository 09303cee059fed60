//! In-memory transport for tests.
//!
//! A [`MemoryHub`] is shared by every network of a test. Each network adds a
//! [`MemoryTransport`] created from the hub; once joined, the test links
//! nodes explicitly with [`MemoryHub::connect`] or
//! [`MemoryHub::force_connect`] and cuts links with
//! [`MemoryHub::disconnect`].

use async_trait::async_trait;
use hopmesh_net::{
    DisconnectReason, NetworkError, NetworkResult, Peer, PeerConnection, Role, Transport,
    TransportOptions,
};
use hopmesh_types::NodeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Buffer size of each in-memory stream direction.
const STREAM_BUFFER: usize = 256 * 1024;

/// A link between two nodes and the connection handles on both ends.
struct Link {
    a: NodeId,
    b: NodeId,
    peers: Vec<Peer>,
}

impl Link {
    fn joins(&self, x: &NodeId, y: &NodeId) -> bool {
        (&self.a == x && &self.b == y) || (&self.a == y && &self.b == x)
    }

    fn touches(&self, id: &NodeId) -> bool {
        &self.a == id || &self.b == id
    }
}

#[derive(Default)]
struct HubInner {
    endpoints: HashMap<NodeId, TransportOptions>,
    links: Vec<Link>,
}

/// Registry of started memory transports.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport registering its network with this hub.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            id: Mutex::new(None),
        }
    }

    fn lock(&self) -> NetworkResult<std::sync::MutexGuard<'_, HubInner>> {
        self.inner
            .lock()
            .map_err(|_| NetworkError::Transport("memory hub poisoned".to_string()))
    }

    fn options(&self, id: &NodeId) -> NetworkResult<TransportOptions> {
        self.lock()?
            .endpoints
            .get(id)
            .cloned()
            .ok_or_else(|| NetworkError::Transport(format!("{} has no started transport", id)))
    }

    fn record(&self, a: NodeId, b: NodeId, peers: Vec<Peer>) -> NetworkResult<()> {
        self.lock()?.links.push(Link { a, b, peers });
        Ok(())
    }

    /// Link `a` (client) and `b` (server) with a negotiating connection.
    pub async fn connect(&self, a: NodeId, b: NodeId) -> NetworkResult<()> {
        let a_options = self.options(&a)?;
        let b_options = self.options(&b)?;
        let (a_stream, b_stream) = tokio::io::duplex(STREAM_BUFFER);

        let b_peer = b_options.accept(b_stream, Role::Server).await?;
        let a_peer = a_options.accept(a_stream, Role::Client).await?;
        debug!(a = %a, b = %b, "Linked nodes");
        self.record(a, b, vec![a_peer, b_peer])
    }

    /// Link `a` and `b` with connections that skip negotiation.
    pub async fn force_connect(&self, a: NodeId, b: NodeId) -> NetworkResult<()> {
        let a_options = self.options(&a)?;
        let b_options = self.options(&b)?;
        let (a_stream, b_stream) = tokio::io::duplex(STREAM_BUFFER);

        let a_conn = Peer::spawn_connected(a_stream, a_options.peer_options(Role::Client), b);
        let b_conn = Peer::spawn_connected(b_stream, b_options.peer_options(Role::Server), a);
        let peers = vec![a_conn.peer.clone(), b_conn.peer.clone()];
        a_options.connector.connect(a_conn).await?;
        b_options.connector.connect(b_conn).await?;
        debug!(a = %a, b = %b, "Force-linked nodes");
        self.record(a, b, peers)
    }

    /// Open a forced connection to `remote`, pretending to be `local`.
    ///
    /// Only `remote` registers the connection; the caller drives the
    /// returned end by hand.
    pub async fn open_raw(&self, local: NodeId, remote: NodeId) -> NetworkResult<PeerConnection> {
        let remote_options = self.options(&remote)?;
        let (local_stream, remote_stream) = tokio::io::duplex(STREAM_BUFFER);

        let local_conn = Peer::spawn_connected(
            local_stream,
            hopmesh_net::PeerOptions::new(local, Role::Client),
            remote,
        );
        let remote_conn =
            Peer::spawn_connected(remote_stream, remote_options.peer_options(Role::Server), local);
        let peers = vec![local_conn.peer.clone(), remote_conn.peer.clone()];
        remote_options.connector.connect(remote_conn).await?;
        self.record(local, remote, peers)?;
        Ok(local_conn)
    }

    /// Cut every link between `a` and `b`. Returns the number of links cut.
    pub fn disconnect(&self, a: NodeId, b: NodeId) -> usize {
        let Ok(mut inner) = self.lock() else {
            return 0;
        };
        let (cut, kept): (Vec<Link>, Vec<Link>) =
            inner.links.drain(..).partition(|link| link.joins(&a, &b));
        inner.links = kept;
        for link in &cut {
            for peer in &link.peers {
                peer.disconnect(DisconnectReason::Manual);
            }
        }
        cut.len()
    }

    /// Nodes with a started transport.
    pub fn endpoints(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .lock()
            .map(|inner| inner.endpoints.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn register(&self, options: TransportOptions) -> NetworkResult<()> {
        self.lock()?.endpoints.insert(options.network_id, options);
        Ok(())
    }

    fn unregister(&self, id: &NodeId) -> NetworkResult<()> {
        let mut inner = self.lock()?;
        inner.endpoints.remove(id);
        let (cut, kept): (Vec<Link>, Vec<Link>) =
            inner.links.drain(..).partition(|link| link.touches(id));
        inner.links = kept;
        for peer in cut.iter().flat_map(|link| link.peers.iter()) {
            peer.disconnect(DisconnectReason::Manual);
        }
        Ok(())
    }
}

/// Transport registering one network with a [`MemoryHub`].
pub struct MemoryTransport {
    hub: MemoryHub,
    id: Mutex<Option<NodeId>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&self, options: TransportOptions) -> NetworkResult<()> {
        if let Ok(mut id) = self.id.lock() {
            *id = Some(options.network_id);
        }
        self.hub.register(options)
    }

    async fn stop(&self) -> NetworkResult<()> {
        let id = self.id.lock().ok().and_then(|mut id| id.take());
        match id {
            Some(id) => self.hub.unregister(&id),
            None => Ok(()),
        }
    }
}
