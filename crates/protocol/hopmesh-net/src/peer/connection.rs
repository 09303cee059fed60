//! Connection task: negotiation state machine and liveness.

use hopmesh_types::NodeId;
use hopmesh_wire::{
    decode_message, encode_frame, encode_message, AuthDataPayload, AuthPayload, FrameDecoder,
    HelloPayload, PeerMessage, SelectPayload,
};
use std::io;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::failure::PhiAccrualDetector;
use super::{
    DisconnectReason, PeerCommand, PeerEvent, PeerInfo, PeerKey, PeerOptions, PeerState, Role,
};
use crate::auth::{AuthContext, ClientAuthFlow, ClientAuthReply, ServerAuthFlow, ServerAuthReply};
use crate::error::{NetworkError, NetworkResult};
use crate::timer::{sleep_until_opt, tick_opt};

const READ_BUFFER_SIZE: usize = 16 * 1024;

type FrameQueue = mpsc::UnboundedSender<Vec<u8>>;

/// Write queued frames in order until the queue closes, then shut the
/// stream down.
///
/// Runs as its own task so a slow or blocked write never stops the
/// connection from reading.
async fn write_frames<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        writer.write_all(&frame).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// Highest version offered by both sides.
fn pick_version(offered: &[u32], supported: &[u32]) -> Option<u32> {
    offered
        .iter()
        .filter(|v| supported.contains(v))
        .max()
        .copied()
}

fn new_interval(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

pub(super) struct PeerTask {
    key: PeerKey,
    options: PeerOptions,
    info: Arc<RwLock<PeerInfo>>,
    events: mpsc::UnboundedSender<PeerEvent>,
    /// Outgoing frames, drained by the writer task.
    frames: Option<FrameQueue>,

    state: PeerState,
    remote_id: Option<NodeId>,
    closed: Option<DisconnectReason>,

    client_flow: Option<Box<dyn ClientAuthFlow>>,
    server_flow: Option<Box<dyn ServerAuthFlow>>,
    next_provider: usize,

    negotiation_deadline: Option<Instant>,
    ping_sent: Option<Instant>,
    ping_timer: Option<Interval>,
    check_timer: Option<Interval>,
    detector: PhiAccrualDetector,
}

impl PeerTask {
    pub fn new(
        key: PeerKey,
        options: PeerOptions,
        info: Arc<RwLock<PeerInfo>>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        let detector = PhiAccrualDetector::new(&options.config);
        Self {
            key,
            options,
            info,
            events,
            frames: None,
            state: PeerState::Initial,
            remote_id: None,
            closed: None,
            client_flow: None,
            server_flow: None,
            next_provider: 0,
            negotiation_deadline: None,
            ping_sent: None,
            ping_timer: None,
            check_timer: None,
            detector,
        }
    }

    pub async fn run<S>(
        mut self,
        stream: S,
        mut command_rx: mpsc::UnboundedReceiver<PeerCommand>,
        forced: Option<NodeId>,
    ) where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        self.frames = Some(frame_tx);
        let mut writer_task = tokio::spawn(write_frames(writer, frame_rx));
        let mut writer_done = false;

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        match forced {
            Some(remote_id) => {
                self.set_remote_id(remote_id);
                self.record_latency(Duration::ZERO);
                self.activate();
            }
            None => self.start(),
        }

        while self.closed.is_none() {
            let deadline = self.negotiation_deadline;
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!(peer = ?self.key, "Stream closed by remote");
                        self.mark_closed(DisconnectReason::Error);
                    }
                    Ok(n) => match decoder.decode(&buf[..n]) {
                        Ok(frames) => {
                            for frame in frames {
                                self.handle_frame(&frame).await;
                                if self.closed.is_some() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(peer = ?self.key, error = %e, "Corrupt stream");
                            self.mark_closed(DisconnectReason::Error);
                        }
                    },
                    Err(e) => {
                        debug!(peer = ?self.key, error = %e, "Stream read failed");
                        self.mark_closed(DisconnectReason::Error);
                    }
                },

                written = &mut writer_task, if !writer_done => {
                    writer_done = true;
                    match written {
                        Ok(Ok(())) => debug!(peer = ?self.key, "Writer stopped"),
                        Ok(Err(e)) => debug!(peer = ?self.key, error = %e, "Stream write failed"),
                        Err(e) => warn!(peer = ?self.key, error = %e, "Writer task failed"),
                    }
                    self.mark_closed(DisconnectReason::Error);
                }

                command = command_rx.recv() => match command {
                    Some(PeerCommand::Send { message, response }) => {
                        let result = self.send_active(&message);
                        if let Some(response) = response {
                            let _ = response.send(result);
                        }
                    }
                    Some(PeerCommand::Disconnect { reason }) => self.disconnect(reason),
                    None => {
                        // every handle is gone
                        self.disconnect(DisconnectReason::Manual);
                    }
                },

                _ = sleep_until_opt(deadline) => {
                    debug!(peer = ?self.key, state = ?self.state, "Negotiation timed out");
                    self.mark_closed(DisconnectReason::NegotiationFailed);
                }

                _ = tick_opt(&mut self.ping_timer) => {
                    self.ping_sent = Some(Instant::now());
                    self.transmit(&PeerMessage::Ping);
                }

                _ = tick_opt(&mut self.check_timer) => {
                    self.check_liveness();
                }
            }
        }

        self.finish(writer_task, writer_done).await;
    }

    // =========================================================================
    // State Bookkeeping
    // =========================================================================

    fn update_info(&self, f: impl FnOnce(&mut PeerInfo)) {
        if let Ok(mut info) = self.info.write() {
            f(&mut info);
        }
    }

    fn set_state(&mut self, state: PeerState) {
        trace!(peer = ?self.key, from = ?self.state, to = ?state, "Peer state transition");
        self.state = state;
        self.update_info(|info| info.state = state);
    }

    fn set_remote_id(&mut self, id: NodeId) {
        self.remote_id = Some(id);
        self.update_info(|info| info.id = Some(id));
    }

    fn record_latency(&self, elapsed: Duration) {
        self.update_info(|info| info.latency.record_duration(elapsed));
    }

    /// Arm the negotiation timeout for the next step.
    fn arm(&mut self) {
        self.negotiation_deadline = Some(Instant::now() + self.options.config.negotiation_timeout);
    }

    fn mark_closed(&mut self, reason: DisconnectReason) {
        if self.closed.is_none() {
            self.closed = Some(reason);
        }
    }

    fn auth_context(&self) -> AuthContext {
        AuthContext {
            local_public_security: self.options.local_security.clone(),
            remote_public_security: self.options.remote_security.clone(),
        }
    }

    /// Hand a frame to the writer task, closing the connection if it is gone.
    fn push_frame(&mut self, frame: Vec<u8>) -> NetworkResult<()> {
        let queued = self
            .frames
            .as_ref()
            .map(|frames| frames.send(frame).is_ok())
            .unwrap_or(false);
        if queued {
            Ok(())
        } else {
            self.mark_closed(DisconnectReason::Error);
            Err(NetworkError::PeerDisconnected)
        }
    }

    /// Queue a protocol message, closing the connection on failure.
    fn transmit(&mut self, message: &PeerMessage) -> bool {
        let frame = match encode_message(message) {
            Ok(bytes) => encode_frame(&bytes),
            Err(e) => {
                warn!(peer = ?self.key, error = %e, "Failed to encode message");
                self.mark_closed(DisconnectReason::Error);
                return false;
            }
        };
        match self.push_frame(frame) {
            Ok(()) => true,
            Err(_) => {
                debug!(peer = ?self.key, "Writer gone, closing");
                false
            }
        }
    }

    fn activate(&mut self) {
        let Some(remote_id) = self.remote_id else {
            self.mark_closed(DisconnectReason::NegotiationFailed);
            return;
        };
        self.set_state(PeerState::Active);
        self.negotiation_deadline = None;

        let now = Instant::now();
        self.detector.heartbeat(now);
        self.ping_timer = Some(new_interval(self.options.config.ping_interval));
        self.check_timer = Some(new_interval(self.options.config.ping_check_interval));

        debug!(peer = ?self.key, remote = %remote_id, "Peer connected");
        let _ = self.events.send(PeerEvent::Connected(remote_id));
    }

    fn disconnect(&mut self, reason: DisconnectReason) {
        if reason == DisconnectReason::Manual && self.state != PeerState::Initial {
            // flushed by the writer before it shuts the stream down
            self.transmit(&PeerMessage::Bye);
        }
        self.mark_closed(reason);
    }

    async fn finish(&mut self, mut writer: JoinHandle<io::Result<()>>, writer_done: bool) {
        let reason = self.closed.unwrap_or(DisconnectReason::Error);

        if let Some(mut flow) = self.client_flow.take() {
            flow.destroy().await;
        }
        if let Some(mut flow) = self.server_flow.take() {
            flow.destroy().await;
        }
        self.negotiation_deadline = None;
        self.ping_timer = None;
        self.check_timer = None;

        // closing the queue lets the writer drain and shut the stream down
        self.frames = None;
        if !writer_done {
            let drained = reason == DisconnectReason::Manual
                && timeout(self.options.config.negotiation_timeout, &mut writer)
                    .await
                    .is_ok();
            if !drained {
                writer.abort();
            }
        }

        self.set_state(PeerState::Initial);
        self.update_info(|info| info.disconnect_reason = Some(reason));

        debug!(peer = ?self.key, remote = ?self.remote_id, %reason, "Peer disconnected");
        let _ = self.events.send(PeerEvent::Disconnected(reason));
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    fn check_liveness(&mut self) {
        let now = Instant::now();
        let silence = self.detector.silence(now).unwrap_or_default();
        if self.detector.is_failed(now) || silence > self.options.config.max_ping_gap {
            warn!(
                peer = ?self.key,
                remote = ?self.remote_id,
                silence_ms = silence.as_millis() as u64,
                "Peer failed liveness check"
            );
            self.mark_closed(DisconnectReason::PingTimeout);
        }
    }

    /// Queue an application or gossip message on the active connection.
    fn send_active(&mut self, message: &PeerMessage) -> NetworkResult<()> {
        if self.state != PeerState::Active {
            return Err(NetworkError::PeerDisconnected);
        }
        let frame = encode_frame(&encode_message(message)?);
        self.push_frame(frame)
    }

    // =========================================================================
    // Negotiation
    // =========================================================================

    fn start(&mut self) {
        match self.options.role {
            Role::Server => {
                let hello = PeerMessage::Hello(HelloPayload {
                    id: self.options.local_id,
                    versions: self.options.config.protocol_versions.clone(),
                    capabilities: self.options.capabilities.clone(),
                });
                if self.transmit(&hello) {
                    self.set_state(PeerState::WaitingForSelect);
                    self.arm();
                }
            }
            Role::Client => {
                self.set_state(PeerState::WaitingForHello);
                self.arm();
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) {
        match decode_message(frame) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                warn!(peer = ?self.key, error = %e, "Undecodable message");
                let reason = if self.state == PeerState::Active {
                    DisconnectReason::Error
                } else {
                    DisconnectReason::NegotiationFailed
                };
                self.mark_closed(reason);
            }
        }
    }

    async fn handle_message(&mut self, message: PeerMessage) {
        trace!(peer = ?self.key, kind = ?message.message_type(), state = ?self.state, "Received");

        match (self.state, message) {
            (_, PeerMessage::Bye) => {
                debug!(peer = ?self.key, "Remote said bye");
                self.mark_closed(DisconnectReason::Manual);
            }

            (PeerState::Active, PeerMessage::Ping) => {
                self.detector.heartbeat(Instant::now());
                self.transmit(&PeerMessage::Pong);
            }
            (PeerState::Active, PeerMessage::Pong) => {
                let now = Instant::now();
                self.detector.heartbeat(now);
                if let Some(sent) = self.ping_sent.take() {
                    self.record_latency(now.saturating_duration_since(sent));
                }
            }
            (PeerState::Active, message) if message.message_type().is_routing() => {
                let _ = self.events.send(PeerEvent::Message(message));
            }

            (PeerState::WaitingForHello, PeerMessage::Hello(hello)) => self.on_hello(hello),
            (PeerState::WaitingForSelect, PeerMessage::Select(select)) => self.on_select(select),
            (PeerState::WaitingForSelectAck, PeerMessage::Ok) => {
                if let Some(sent) = self.ping_sent.take() {
                    self.record_latency(sent.elapsed());
                }
                self.start_client_auth().await;
            }
            (PeerState::WaitingForAuth, PeerMessage::Auth(auth)) => {
                self.on_auth(auth).await;
            }
            (PeerState::WaitingForAuthData, PeerMessage::Auth(auth)) => {
                // the client gave up on the running exchange and tries another method
                if let Some(mut flow) = self.server_flow.take() {
                    flow.destroy().await;
                }
                self.on_auth(auth).await;
            }
            (PeerState::WaitingForAuthAck, PeerMessage::Ok) => {
                if let Some(mut flow) = self.client_flow.take() {
                    flow.destroy().await;
                }
                if self.transmit(&PeerMessage::Begin) {
                    self.activate();
                }
            }
            (PeerState::WaitingForAuthAck, PeerMessage::Reject) => {
                debug!(peer = ?self.key, "Auth attempt rejected");
                self.next_client_auth().await;
            }
            (PeerState::WaitingForAuthAck, PeerMessage::AuthData(data)) => {
                self.on_client_auth_data(data).await;
            }
            (PeerState::WaitingForAuthData, PeerMessage::AuthData(data)) => {
                let reply = match self.server_flow.as_mut() {
                    Some(flow) => flow.receive_data(&data.data).await,
                    None => {
                        self.mark_closed(DisconnectReason::NegotiationFailed);
                        return;
                    }
                };
                self.apply_server_reply(reply).await;
            }
            (PeerState::WaitingForBegin, PeerMessage::Begin) => {
                if let Some(sent) = self.ping_sent.take() {
                    self.record_latency(sent.elapsed());
                }
                self.activate();
            }

            (state, message) => {
                warn!(
                    peer = ?self.key,
                    ?state,
                    kind = ?message.message_type(),
                    "Unexpected message, aborting connection"
                );
                self.mark_closed(DisconnectReason::NegotiationFailed);
            }
        }
    }

    fn on_hello(&mut self, hello: HelloPayload) {
        if hello.id == self.options.local_id {
            debug!(peer = ?self.key, "Connected to self");
            self.mark_closed(DisconnectReason::NegotiationFailed);
            return;
        }
        let Some(version) = pick_version(&hello.versions, &self.options.config.protocol_versions)
        else {
            warn!(peer = ?self.key, offered = ?hello.versions, "No common protocol version");
            self.mark_closed(DisconnectReason::NegotiationFailed);
            return;
        };

        self.set_remote_id(hello.id);
        let select = PeerMessage::Select(SelectPayload {
            id: self.options.local_id,
            version,
            capabilities: self.options.capabilities.clone(),
        });
        self.ping_sent = Some(Instant::now());
        if self.transmit(&select) {
            self.set_state(PeerState::WaitingForSelectAck);
            self.arm();
        }
    }

    fn on_select(&mut self, select: SelectPayload) {
        if select.id == self.options.local_id {
            debug!(peer = ?self.key, "Connected to self");
            self.mark_closed(DisconnectReason::NegotiationFailed);
            return;
        }
        if !self.options.config.protocol_versions.contains(&select.version) {
            warn!(peer = ?self.key, version = select.version, "Unsupported protocol version selected");
            self.mark_closed(DisconnectReason::NegotiationFailed);
            return;
        }

        self.set_remote_id(select.id);
        if self.transmit(&PeerMessage::Ok) {
            self.set_state(PeerState::WaitingForAuth);
            self.arm();
        }
    }

    /// Drop the current client flow and move on to the next provider.
    async fn next_client_auth(&mut self) {
        if let Some(mut flow) = self.client_flow.take() {
            flow.destroy().await;
        }
        self.start_client_auth().await;
    }

    /// Try the next provider offering a client flow.
    async fn start_client_auth(&mut self) {
        let ctx = self.auth_context();
        while self.next_provider < self.options.auth.len() {
            let provider = self.options.auth[self.next_provider].clone();
            self.next_provider += 1;

            let Some(mut flow) = provider.create_client_flow(&ctx) else {
                continue;
            };
            match flow.initial_message().await {
                Ok(data) => {
                    let auth = PeerMessage::Auth(AuthPayload {
                        method: provider.id().to_string(),
                        data,
                    });
                    self.client_flow = Some(flow);
                    if self.transmit(&auth) {
                        self.set_state(PeerState::WaitingForAuthAck);
                        self.arm();
                    }
                    return;
                }
                Err(e) => {
                    debug!(peer = ?self.key, method = provider.id(), error = %e, "Auth flow failed to start");
                    flow.destroy().await;
                }
            }
        }

        debug!(peer = ?self.key, "No auth provider left");
        self.mark_closed(DisconnectReason::AuthReject);
    }

    async fn on_client_auth_data(&mut self, data: AuthDataPayload) {
        let reply = match self.client_flow.as_mut() {
            Some(flow) => flow.receive_data(&data.data).await,
            None => {
                self.mark_closed(DisconnectReason::NegotiationFailed);
                return;
            }
        };

        match reply {
            Ok(ClientAuthReply::Data(data)) => {
                let message = PeerMessage::AuthData(AuthDataPayload { data });
                if self.transmit(&message) {
                    self.arm();
                }
            }
            Ok(ClientAuthReply::Reject) | Err(_) => {
                debug!(peer = ?self.key, "Client auth flow gave up");
                self.next_client_auth().await;
            }
        }
    }

    async fn on_auth(&mut self, auth: AuthPayload) {
        let ctx = self.auth_context();
        let flow = self
            .options
            .auth
            .iter()
            .find(|provider| provider.id() == auth.method)
            .and_then(|provider| provider.create_server_flow(&ctx));

        let Some(mut flow) = flow else {
            debug!(peer = ?self.key, method = %auth.method, "Unknown auth method");
            if self.transmit(&PeerMessage::Reject) {
                self.set_state(PeerState::WaitingForAuth);
                self.arm();
            }
            return;
        };

        let reply = flow.receive_initial(&auth.data).await;
        self.server_flow = Some(flow);
        self.apply_server_reply(reply).await;
    }

    async fn apply_server_reply(&mut self, reply: NetworkResult<ServerAuthReply>) {
        match reply {
            Ok(ServerAuthReply::Ok) => {
                if let Some(mut flow) = self.server_flow.take() {
                    flow.destroy().await;
                }
                self.ping_sent = Some(Instant::now());
                if self.transmit(&PeerMessage::Ok) {
                    self.set_state(PeerState::WaitingForBegin);
                    self.arm();
                }
            }
            Ok(ServerAuthReply::Data(data)) => {
                let message = PeerMessage::AuthData(AuthDataPayload { data });
                if self.transmit(&message) {
                    self.set_state(PeerState::WaitingForAuthData);
                    self.arm();
                }
            }
            Ok(ServerAuthReply::Reject) | Err(_) => {
                if let Some(mut flow) = self.server_flow.take() {
                    flow.destroy().await;
                }
                debug!(peer = ?self.key, "Rejecting auth attempt");
                if self.transmit(&PeerMessage::Reject) {
                    self.set_state(PeerState::WaitingForAuth);
                    self.arm();
                }
            }
        }
    }
}
