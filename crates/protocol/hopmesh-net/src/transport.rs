//! Transport contract.
//!
//! Transports discover other nodes and establish raw byte streams. They hand
//! every stream to [`TransportOptions::accept`], which spawns a negotiating
//! [`Peer`] over it and registers the connection with the topology; from
//! then on the transport is out of the picture.
//!
//! [`TcpTransport`] is a minimal implementation that listens on one address
//! and dials a fixed list of addresses.

use async_trait::async_trait;
use hopmesh_types::NodeId;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AuthProvider;
use crate::config::PeerConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::peer::{Peer, PeerConnection, PeerOptions, Role};
use crate::topology::Topology;

/// A source of peer connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start discovering and connecting. Streams are handed over through
    /// `options`.
    async fn start(&self, options: TransportOptions) -> NetworkResult<()>;

    /// Stop accepting and dialing. Established connections are owned by the
    /// topology and are not affected.
    async fn stop(&self) -> NetworkResult<()>;
}

/// Registers peer connections with a topology.
#[derive(Debug, Clone)]
pub struct PeerConnector {
    topology: Topology,
}

impl PeerConnector {
    pub fn new(topology: Topology) -> Self {
        Self { topology }
    }

    /// Hand a spawned connection to the topology.
    pub async fn connect(&self, connection: PeerConnection) -> NetworkResult<()> {
        self.topology.add_peer(connection).await
    }
}

/// Everything a transport needs from the network it serves.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Id of the local node.
    pub network_id: NodeId,
    /// Name of the network, for discovery.
    pub network_name: String,
    /// Whether the local node is an endpoint.
    pub endpoint: bool,
    /// Auth providers for new connections.
    pub auth: Vec<Arc<dyn AuthProvider>>,
    /// Capabilities announced during negotiation.
    pub capabilities: Vec<String>,
    /// Per-connection timing.
    pub peer_config: PeerConfig,
    /// Where new connections go.
    pub connector: PeerConnector,
}

impl TransportOptions {
    /// Connection settings for the given handshake side.
    pub fn peer_options(&self, role: Role) -> PeerOptions {
        let mut options = PeerOptions::new(self.network_id, role)
            .with_auth(self.auth.clone())
            .with_config(self.peer_config.clone());
        options.capabilities = self.capabilities.clone();
        options
    }

    /// Spawn a negotiating peer over `stream` and register it.
    pub async fn accept<S>(&self, stream: S, role: Role) -> NetworkResult<Peer>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connection = Peer::spawn(stream, self.peer_options(role));
        let peer = connection.peer.clone();
        self.connector.connect(connection).await?;
        Ok(peer)
    }
}

// =============================================================================
// TCP
// =============================================================================

/// Listens on one address and dials a fixed set of addresses.
///
/// There is no reconnect policy; a failed dial is logged and dropped.
#[derive(Debug, Default)]
pub struct TcpTransport {
    listen_addr: Option<SocketAddr>,
    dial_addrs: Vec<SocketAddr>,
    state: Mutex<TcpState>,
}

#[derive(Debug, Default)]
struct TcpState {
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept connections on `addr`. Port 0 picks a free port.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    /// Dial `addr` on start.
    pub fn with_peer(mut self, addr: SocketAddr) -> Self {
        self.dial_addrs.push(addr);
        self
    }

    /// Bound listen address while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().ok().and_then(|state| state.local_addr)
    }

    fn push_task(&self, task: JoinHandle<()>) -> NetworkResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NetworkError::Transport("transport state poisoned".to_string()))?;
        state.tasks.push(task);
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&self, options: TransportOptions) -> NetworkResult<()> {
        if let Some(addr) = self.listen_addr {
            let listener = TcpListener::bind(addr).await?;
            let local_addr = listener.local_addr()?;
            if let Ok(mut state) = self.state.lock() {
                state.local_addr = Some(local_addr);
            }
            info!(addr = %local_addr, network = %options.network_name, "Listening");

            let accept_options = options.clone();
            self.push_task(tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, remote)) => {
                            debug!(remote = %remote, "Accepted connection");
                            let _ = stream.set_nodelay(true);
                            match accept_options.accept(stream, Role::Server).await {
                                Ok(_) => {}
                                Err(NetworkError::ChannelClosed) => {
                                    debug!("Topology gone, closing listener");
                                    break;
                                }
                                Err(e) => {
                                    warn!(remote = %remote, error = %e, "Failed to register connection");
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
            }))?;
        }

        for addr in self.dial_addrs.iter().copied() {
            let dial_options = options.clone();
            self.push_task(tokio::spawn(async move {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        debug!(remote = %addr, "Connected");
                        let _ = stream.set_nodelay(true);
                        if let Err(e) = dial_options.accept(stream, Role::Client).await {
                            warn!(remote = %addr, error = %e, "Failed to register connection");
                        }
                    }
                    Err(e) => warn!(remote = %addr, error = %e, "Dial failed"),
                }
            }))?;
        }
        Ok(())
    }

    async fn stop(&self) -> NetworkResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NetworkError::Transport("transport state poisoned".to_string()))?;
        for task in state.tasks.drain(..) {
            task.abort();
        }
        state.local_addr = None;
        Ok(())
    }
}
