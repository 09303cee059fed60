use std::fmt;

/// Negotiation state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Not negotiating; also the state after disconnect.
    Initial,
    /// Client waiting for the server's Hello.
    WaitingForHello,
    /// Server waiting for the client's Select.
    WaitingForSelect,
    /// Client waiting for the server to accept its Select.
    WaitingForSelectAck,
    /// Server waiting for an Auth attempt.
    WaitingForAuth,
    /// Client waiting for the server's verdict on its Auth attempt.
    WaitingForAuthAck,
    /// Server waiting for another AuthData round.
    WaitingForAuthData,
    /// Server waiting for Begin after accepting auth.
    WaitingForBegin,
    /// Negotiated; routing and data messages may flow.
    Active,
}

impl PeerState {
    /// Whether the connection is in the middle of the handshake.
    pub fn is_negotiating(&self) -> bool {
        !matches!(self, PeerState::Initial | PeerState::Active)
    }
}

/// Side of the handshake a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Waits for Hello, then selects a version and authenticates.
    Client,
    /// Sends Hello and verifies the client.
    Server,
}

/// Why a connection ended.
///
/// Transports use the reason to decide whether to reconnect; a `Manual`
/// disconnect should not be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Closed on request of either side.
    Manual,
    /// Stream failure or close.
    Error,
    /// The liveness check failed.
    PingTimeout,
    /// Handshake timed out or the remote broke protocol.
    NegotiationFailed,
    /// No auth provider succeeded.
    AuthReject,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::Manual => "manual",
            DisconnectReason::Error => "error",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::NegotiationFailed => "negotiation failed",
            DisconnectReason::AuthReject => "auth rejected",
        };
        f.write_str(s)
    }
}
