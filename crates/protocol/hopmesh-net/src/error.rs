//! Network error types.
//!
//! This module defines all error types for the hopmesh-net crate.

use hopmesh_types::NodeId;
use thiserror::Error;

/// Network-specific errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NetworkError {
    /// No route to the target node is known.
    #[error("node {0} is not reachable")]
    NotReachable(NodeId),

    /// The target did not acknowledge in time.
    #[error("timed out waiting for acknowledgement")]
    Timeout,

    /// A node on the path rejected the message.
    #[error("could not forward message")]
    CouldNotForward,

    /// The peer connection is closed or not yet active.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// No round-trip samples have been recorded for the peer yet.
    #[error("no latency samples recorded")]
    NoLatency,

    /// Internal channel closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Transport layer error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Failed to encode a message.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a message.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The network has not been joined.
    #[error("network not joined")]
    NotJoined,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Returns true if this error is transient and the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotReachable(_)
                | Self::Timeout
                | Self::CouldNotForward
                | Self::PeerDisconnected
                | Self::Transport(_)
        )
    }

    /// Metric labels for monitoring integration.
    ///
    /// Returns `(category, variant)` suitable for use as metric labels.
    pub fn metric_labels(&self) -> (&'static str, &'static str) {
        match self {
            Self::NotReachable(_) => ("routing", "not_reachable"),
            Self::Timeout => ("routing", "timeout"),
            Self::CouldNotForward => ("routing", "could_not_forward"),
            Self::PeerDisconnected => ("peer", "disconnected"),
            Self::NoLatency => ("peer", "no_latency"),
            Self::ChannelClosed => ("network", "channel_closed"),
            Self::Transport(_) => ("network", "transport"),
            Self::Encoding(_) => ("network", "encoding"),
            Self::Decoding(_) => ("network", "decoding"),
            Self::NotJoined => ("network", "not_joined"),
            Self::Io(_) => ("network", "io"),
        }
    }
}

impl From<hopmesh_wire::EncodeError> for NetworkError {
    fn from(err: hopmesh_wire::EncodeError) -> Self {
        NetworkError::Encoding(err.to_string())
    }
}

impl From<hopmesh_wire::DecodeError> for NetworkError {
    fn from(err: hopmesh_wire::DecodeError) -> Self {
        NetworkError::Decoding(err.to_string())
    }
}

/// Result type alias using NetworkError.
pub type NetworkResult<T> = Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", NetworkError::CouldNotForward),
            "could not forward message"
        );

        let id = NodeId::generate();
        let err = NetworkError::NotReachable(id);
        assert!(format!("{}", err).contains(&id.encode()));

        let err = NetworkError::Transport("connection reset".to_string());
        assert_eq!(format!("{}", err), "transport error: connection reset");
    }

    #[test]
    fn test_is_transient() {
        assert!(NetworkError::Timeout.is_transient());
        assert!(NetworkError::CouldNotForward.is_transient());
        assert!(NetworkError::NotReachable(NodeId::generate()).is_transient());

        assert!(!NetworkError::NotJoined.is_transient());
        assert!(!NetworkError::Decoding("bad".into()).is_transient());
        assert!(!NetworkError::NoLatency.is_transient());
    }

    #[test]
    fn test_metric_labels() {
        let (cat, var) = NetworkError::Timeout.metric_labels();
        assert_eq!(cat, "routing");
        assert_eq!(var, "timeout");

        let (cat, var) = NetworkError::PeerDisconnected.metric_labels();
        assert_eq!(cat, "peer");
        assert_eq!(var, "disconnected");
    }

    #[test]
    fn test_from_wire_errors() {
        let err: NetworkError = hopmesh_wire::DecodeError::InvalidMessageType(99).into();
        assert!(matches!(err, NetworkError::Decoding(_)));
    }
}
