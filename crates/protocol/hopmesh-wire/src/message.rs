//! Message types exchanged between directly connected peers.
//!
//! The set of messages is closed: negotiation, liveness, gossip and data.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::payload::{
    AuthDataPayload, AuthPayload, DataAckPayload, DataPayload, HelloPayload, NodeDetailsPayload,
    NodeRequestPayload, NodeSummaryPayload, SelectPayload,
};

/// Message type tags.
///
/// Tags are stable within a deployment; they are the first CBOR item of
/// every encoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[non_exhaustive]
pub enum MessageType {
    // =========================================================================
    // Liveness
    // =========================================================================
    Ping = 0,
    Pong = 1,

    // =========================================================================
    // Negotiation
    // =========================================================================
    Ok = 2,
    Reject = 3,
    Hello = 4,
    Select = 5,
    Auth = 6,
    AuthData = 7,
    Begin = 8,
    Bye = 9,

    // =========================================================================
    // Gossip
    // =========================================================================
    NodeSummary = 10,
    NodeRequest = 11,
    NodeDetails = 12,

    // =========================================================================
    // Data
    // =========================================================================
    Data = 13,
    DataAck = 14,
    DataReject = 15,
}

impl MessageType {
    /// Convert a tag value to a MessageType.
    ///
    /// Returns `Err(DecodeError::InvalidMessageType)` for unknown tags.
    pub fn from_tag(value: u64) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(MessageType::Ping),
            1 => Ok(MessageType::Pong),
            2 => Ok(MessageType::Ok),
            3 => Ok(MessageType::Reject),
            4 => Ok(MessageType::Hello),
            5 => Ok(MessageType::Select),
            6 => Ok(MessageType::Auth),
            7 => Ok(MessageType::AuthData),
            8 => Ok(MessageType::Begin),
            9 => Ok(MessageType::Bye),
            10 => Ok(MessageType::NodeSummary),
            11 => Ok(MessageType::NodeRequest),
            12 => Ok(MessageType::NodeDetails),
            13 => Ok(MessageType::Data),
            14 => Ok(MessageType::DataAck),
            15 => Ok(MessageType::DataReject),
            _ => Err(DecodeError::InvalidMessageType(value)),
        }
    }

    /// The wire tag of this message type.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Messages that drive the connection handshake.
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            MessageType::Ok
                | MessageType::Reject
                | MessageType::Hello
                | MessageType::Select
                | MessageType::Auth
                | MessageType::AuthData
                | MessageType::Begin
        )
    }

    /// Messages only legal on an active connection and handed to the
    /// topology rather than the state machine.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            MessageType::NodeSummary
                | MessageType::NodeRequest
                | MessageType::NodeDetails
                | MessageType::Data
                | MessageType::DataAck
                | MessageType::DataReject
        )
    }
}

/// A decoded peer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Ping,
    Pong,
    Ok,
    Reject,
    Hello(HelloPayload),
    Select(SelectPayload),
    Auth(AuthPayload),
    AuthData(AuthDataPayload),
    Begin,
    Bye,
    NodeSummary(NodeSummaryPayload),
    NodeRequest(NodeRequestPayload),
    NodeDetails(NodeDetailsPayload),
    Data(DataPayload),
    DataAck(DataAckPayload),
    DataReject(DataAckPayload),
}

impl PeerMessage {
    /// The type tag of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            PeerMessage::Ping => MessageType::Ping,
            PeerMessage::Pong => MessageType::Pong,
            PeerMessage::Ok => MessageType::Ok,
            PeerMessage::Reject => MessageType::Reject,
            PeerMessage::Hello(_) => MessageType::Hello,
            PeerMessage::Select(_) => MessageType::Select,
            PeerMessage::Auth(_) => MessageType::Auth,
            PeerMessage::AuthData(_) => MessageType::AuthData,
            PeerMessage::Begin => MessageType::Begin,
            PeerMessage::Bye => MessageType::Bye,
            PeerMessage::NodeSummary(_) => MessageType::NodeSummary,
            PeerMessage::NodeRequest(_) => MessageType::NodeRequest,
            PeerMessage::NodeDetails(_) => MessageType::NodeDetails,
            PeerMessage::Data(_) => MessageType::Data,
            PeerMessage::DataAck(_) => MessageType::DataAck,
            PeerMessage::DataReject(_) => MessageType::DataReject,
        }
    }
}
