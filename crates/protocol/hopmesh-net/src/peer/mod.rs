//! Peer connections.
//!
//! A [`Peer`] is a handle to one byte-stream connection running the
//! negotiation state machine in its own task:
//!
//! ```text
//! server                              client
//!   Hello { id, versions }        ->
//!                                 <-  Select { id, version }
//!   Ok                            ->
//!                                 <-  Auth { method, data }
//!   (AuthData rounds)            <->
//!   Ok                            ->
//!                                 <-  Begin
//!   ============== active: Ping/Pong, gossip, data ==============
//! ```
//!
//! The task owns the stream; writes go through a queue drained by a
//! separate writer task so reading never waits on the remote side. Everything the connection observes is reported
//! as [`PeerEvent`]s on the receiver returned alongside the handle; whoever
//! registers the connection (normally the topology) drains it.

mod connection;
mod failure;
mod latency;
mod state;

pub use state::{DisconnectReason, PeerState, Role};

use hopmesh_types::NodeId;
use hopmesh_wire::PeerMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::auth::AuthProvider;
use crate::config::PeerConfig;
use crate::error::{NetworkError, NetworkResult};
use connection::PeerTask;
use latency::LatencyWindow;

/// Process-unique key of a connection.
///
/// Two connections to the same node have the same [`NodeId`] but different
/// keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey(u64);

impl PeerKey {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        PeerKey(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn for_test(value: u64) -> Self {
        PeerKey(value)
    }
}

/// Events reported by a connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Negotiation finished; the remote id is known.
    Connected(NodeId),
    /// The connection is closed. Always the last event.
    Disconnected(DisconnectReason),
    /// A gossip or data message arrived on the active connection.
    Message(PeerMessage),
}

/// Settings of one connection.
#[derive(Debug, Clone)]
pub struct PeerOptions {
    /// Id announced to the remote side.
    pub local_id: NodeId,
    /// Handshake side.
    pub role: Role,
    /// Auth providers; clients try them in order.
    pub auth: Vec<Arc<dyn AuthProvider>>,
    /// Capabilities announced during negotiation.
    pub capabilities: Vec<String>,
    /// Timing settings.
    pub config: PeerConfig,
    /// Public security data of the local side of the stream.
    pub local_security: Option<Vec<u8>>,
    /// Public security data of the remote side of the stream.
    pub remote_security: Option<Vec<u8>>,
}

impl PeerOptions {
    /// Options with default timing and anonymous auth.
    pub fn new(local_id: NodeId, role: Role) -> Self {
        Self {
            local_id,
            role,
            auth: vec![Arc::new(crate::auth::AnonymousAuth)],
            capabilities: Vec::new(),
            config: PeerConfig::default(),
            local_security: None,
            remote_security: None,
        }
    }

    /// Replace the auth providers.
    pub fn with_auth(mut self, auth: Vec<Arc<dyn AuthProvider>>) -> Self {
        self.auth = auth;
        self
    }

    /// Replace the timing settings.
    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set channel binding material for auth flows.
    pub fn with_security(mut self, local: Option<Vec<u8>>, remote: Option<Vec<u8>>) -> Self {
        self.local_security = local;
        self.remote_security = remote;
        self
    }
}

/// Commands sent to the connection task.
#[derive(Debug)]
pub(crate) enum PeerCommand {
    /// Queue a message; the reply is sent once it is handed to the writer.
    Send {
        message: PeerMessage,
        response: Option<oneshot::Sender<NetworkResult<()>>>,
    },

    /// Close the connection.
    Disconnect { reason: DisconnectReason },
}

/// State shared between the handle and the task.
#[derive(Debug)]
pub(crate) struct PeerInfo {
    pub id: Option<NodeId>,
    pub state: PeerState,
    pub latency: LatencyWindow,
    pub disconnect_reason: Option<DisconnectReason>,
}

/// Handle to a peer connection.
#[derive(Debug, Clone)]
pub struct Peer {
    key: PeerKey,
    info: Arc<RwLock<PeerInfo>>,
    command_tx: mpsc::UnboundedSender<PeerCommand>,
}

/// A freshly spawned connection: its handle and its event stream.
#[derive(Debug)]
pub struct PeerConnection {
    pub peer: Peer,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

impl Peer {
    /// Spawn a connection task negotiating over `stream`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn<S>(stream: S, options: PeerOptions) -> PeerConnection
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::spawn_inner(stream, options, None)
    }

    /// Spawn a connection that skips negotiation and is active at once with
    /// `remote_id` and a zero latency sample.
    ///
    /// Both sides of the stream must be spawned this way.
    pub fn spawn_connected<S>(stream: S, options: PeerOptions, remote_id: NodeId) -> PeerConnection
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::spawn_inner(stream, options, Some(remote_id))
    }

    fn spawn_inner<S>(stream: S, options: PeerOptions, forced: Option<NodeId>) -> PeerConnection
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let key = PeerKey::next();
        let info = Arc::new(RwLock::new(PeerInfo {
            id: None,
            state: PeerState::Initial,
            latency: LatencyWindow::new(options.config.latency_samples),
            disconnect_reason: None,
        }));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        debug!(peer = ?key, role = ?options.role, forced = forced.is_some(), "Spawning peer");
        let task = PeerTask::new(key, options, info.clone(), event_tx);
        tokio::spawn(task.run(stream, command_rx, forced));

        PeerConnection {
            peer: Peer {
                key,
                info,
                command_tx,
            },
            events: event_rx,
        }
    }

    /// Unique key of this connection.
    pub fn key(&self) -> PeerKey {
        self.key
    }

    /// Remote node id, known once negotiation got far enough.
    pub fn id(&self) -> Option<NodeId> {
        self.info.read().ok().and_then(|info| info.id)
    }

    /// Current negotiation state.
    pub fn state(&self) -> PeerState {
        self.info
            .read()
            .map(|info| info.state)
            .unwrap_or(PeerState::Initial)
    }

    /// Whether the connection is active.
    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Active
    }

    /// Why the connection ended, once it has.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.info.read().ok().and_then(|info| info.disconnect_reason)
    }

    /// Mean round-trip time in milliseconds.
    ///
    /// # Errors
    /// `NoLatency` until the first sample is recorded.
    pub fn latency(&self) -> NetworkResult<u32> {
        self.info
            .read()
            .ok()
            .and_then(|info| info.latency.mean())
            .ok_or(NetworkError::NoLatency)
    }

    /// Send a message and wait until the connection task has queued it.
    ///
    /// # Errors
    /// `PeerDisconnected` if the connection is not active or already closed.
    pub async fn send(&self, message: PeerMessage) -> NetworkResult<()> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(PeerCommand::Send {
                message,
                response: Some(tx),
            })
            .map_err(|_| NetworkError::PeerDisconnected)?;
        rx.await.map_err(|_| NetworkError::PeerDisconnected)?
    }

    /// Queue a message without waiting for the write.
    ///
    /// # Errors
    /// `PeerDisconnected` if the connection task has already exited.
    pub fn post(&self, message: PeerMessage) -> NetworkResult<()> {
        self.command_tx
            .send(PeerCommand::Send {
                message,
                response: None,
            })
            .map_err(|_| NetworkError::PeerDisconnected)
    }

    /// Close the connection. A `Manual` disconnect notifies the remote side
    /// with Bye first.
    pub fn disconnect(&self, reason: DisconnectReason) {
        // an exited task is already disconnected
        let _ = self.command_tx.send(PeerCommand::Disconnect { reason });
    }
}
