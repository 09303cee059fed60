//! Serde serialization implementations for identifier types.
//!
//! Ids are serialized as base58 strings for human readability in JSON,
//! and as raw byte strings in binary formats like CBOR.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::id::{NodeId, NODE_ID_LEN};

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.encode())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

struct NodeIdVisitor;

impl<'de> de::Visitor<'de> for NodeIdVisitor {
    type Value = NodeId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a {}-byte node id", NODE_ID_LEN)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<NodeId, E> {
        NodeId::decode(v).map_err(E::custom)
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<NodeId, E> {
        NodeId::from_slice(v).map_err(E::custom)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<NodeId, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        let mut bytes = Vec::with_capacity(NODE_ID_LEN);
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        NodeId::from_slice(&bytes).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(NodeIdVisitor)
        } else {
            deserializer.deserialize_bytes(NodeIdVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_uses_base58() {
        let id = NodeId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.encode()));
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_cbor_uses_byte_string() {
        let id = NodeId::generate();
        let mut buf = Vec::new();
        ciborium::into_writer(&id, &mut buf).unwrap();
        // major type 2 (bytes), length 16
        assert_eq!(buf[0], 0x50);
        assert_eq!(&buf[1..], id.as_bytes());
        let back: NodeId = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_cbor_rejects_wrong_length() {
        let mut buf = Vec::new();
        ciborium::into_writer(&ciborium::Value::Bytes(vec![1, 2, 3]), &mut buf).unwrap();
        let result: Result<NodeId, _> = ciborium::from_reader(buf.as_slice());
        assert!(result.is_err());
    }
}
