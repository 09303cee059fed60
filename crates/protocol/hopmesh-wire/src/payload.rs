//! Payload types for peer messages.
//!
//! Each payload-carrying message type has a dedicated struct. Unit messages
//! (Ping, Pong, Ok, Reject, Begin, Bye) carry no payload.

use hopmesh_types::NodeId;
use serde::{Deserialize, Serialize};

// =============================================================================
// Negotiation Payloads
// =============================================================================

/// Sent by the server as soon as a connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Server node id
    pub id: NodeId,
    /// Protocol versions the server can speak
    pub versions: Vec<u32>,
    /// Free-form capability names
    pub capabilities: Vec<String>,
}

/// Client reply to Hello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectPayload {
    /// Client node id
    pub id: NodeId,
    /// Protocol version picked by the client
    pub version: u32,
    /// Free-form capability names
    pub capabilities: Vec<String>,
}

/// Start of an authentication attempt with one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    /// Auth provider id
    pub method: String,
    /// Initial auth data produced by the client flow
    #[serde(with = "byte_buf")]
    pub data: Vec<u8>,
}

/// Additional round of an authentication exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDataPayload {
    #[serde(with = "byte_buf")]
    pub data: Vec<u8>,
}

// =============================================================================
// Gossip Payloads
// =============================================================================

/// Version of one node as seen by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVersion {
    pub id: NodeId,
    pub version: u64,
}

/// Advertises which nodes the sender can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummaryPayload {
    /// Version of the sender's own neighbor list
    pub own_version: u64,
    pub nodes: Vec<NodeVersion>,
}

/// Asks for full routing records of the listed nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRequestPayload {
    pub nodes: Vec<NodeId>,
}

/// One neighbor of a node with the measured latency towards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborLatency {
    pub id: NodeId,
    /// Latency in milliseconds
    pub latency: u32,
}

/// Full routing record of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRoutingDetails {
    pub id: NodeId,
    pub version: u64,
    pub neighbors: Vec<NeighborLatency>,
}

/// Reply to NodeRequest, also used for periodic latency gossip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDetailsPayload {
    pub nodes: Vec<NodeRoutingDetails>,
}

// =============================================================================
// Data Payloads
// =============================================================================

/// One hop of a data message: the node that handled it and the local
/// message id it assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub node: NodeId,
    pub id: u64,
}

/// Application data travelling towards `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPayload {
    pub target: NodeId,
    /// Hops taken so far; the first entry is the originator
    pub path: Vec<PathEntry>,
    /// Application message type
    pub message_type: String,
    #[serde(with = "byte_buf")]
    pub data: Vec<u8>,
}

impl DataPayload {
    /// The originating node, if the path is not empty.
    pub fn source(&self) -> Option<NodeId> {
        self.path.first().map(|entry| entry.node)
    }

    /// Whether `node` already handled this message.
    pub fn has_visited(&self, node: &NodeId) -> bool {
        self.path.iter().any(|entry| &entry.node == node)
    }
}

/// Acknowledges or rejects the data message with the given hop-local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAckPayload {
    pub id: u64,
}

/// Serde adapter writing `Vec<u8>` as a CBOR byte string instead of an
/// array of integers.
pub(crate) mod byte_buf {
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    struct ByteBufVisitor;

    impl<'de> de::Visitor<'de> for ByteBufVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Vec<u8>, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_byte_buf(ByteBufVisitor)
    }
}
