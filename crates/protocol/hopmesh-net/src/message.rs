//! Application messages.

use hopmesh_types::NodeId;
use serde::de::DeserializeOwned;

use crate::error::NetworkResult;

/// A message delivered to the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Node that sent the message.
    pub source: NodeId,
    /// Application message type.
    pub message_type: String,
    /// CBOR-encoded payload, or raw bytes for `send_raw`.
    pub data: Vec<u8>,
}

impl Message {
    /// Decode the payload.
    ///
    /// # Example
    /// ```
    /// use hopmesh_net::Message;
    /// use hopmesh_types::NodeId;
    ///
    /// let msg = Message {
    ///     source: NodeId::generate(),
    ///     message_type: "greeting".to_string(),
    ///     data: hopmesh_wire::encode_payload(&"hi").unwrap(),
    /// };
    /// assert_eq!(msg.decode::<String>().unwrap(), "hi");
    /// ```
    pub fn decode<T: DeserializeOwned>(&self) -> NetworkResult<T> {
        Ok(hopmesh_wire::decode_payload(&self.data)?)
    }
}
