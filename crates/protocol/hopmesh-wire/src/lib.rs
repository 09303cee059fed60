//! Wire protocol for hopmesh peer connections.
//!
//! This crate provides:
//!
//! - **Messages**: the closed set of [`PeerMessage`]s exchanged between
//!   directly connected nodes (negotiation, liveness, gossip, data)
//! - **Encoding**: CBOR tag + payload encoding of messages
//! - **Framing**: a compact length header and a streaming
//!   [`FrameDecoder`] that tolerates arbitrary chunk boundaries
//!
//! # Example
//!
//! ```
//! use hopmesh_wire::{decode_message, encode_frame, encode_message, FrameDecoder, PeerMessage};
//!
//! let frame = encode_frame(&encode_message(&PeerMessage::Pong).unwrap());
//!
//! let mut decoder = FrameDecoder::new();
//! assert!(decoder.decode(&frame[..0]).unwrap().is_empty());
//! let frames = decoder.decode(&frame).unwrap();
//! assert_eq!(decode_message(&frames[0]).unwrap(), PeerMessage::Pong);
//! ```

pub mod encoding;
pub mod error;
pub mod framing;
pub mod message;
pub mod payload;

// Error types
pub use error::{DecodeError, EncodeError, FrameError};

// Message types
pub use message::{MessageType, PeerMessage};

// Payloads
pub use payload::{
    AuthDataPayload, AuthPayload, DataAckPayload, DataPayload, HelloPayload, NeighborLatency,
    NodeDetailsPayload, NodeRequestPayload, NodeRoutingDetails, NodeSummaryPayload, NodeVersion,
    PathEntry, SelectPayload,
};

// Encoding functions
pub use encoding::{decode_message, decode_payload, encode_message, encode_payload};

// Framing
pub use framing::{encode_frame, FrameDecoder};
