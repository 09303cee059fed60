//! Node identity.
//!
//! A [`NodeId`] is 16 random bytes with the UUIDv4 version and variant bits
//! set. Ids are regenerated on every process start; they are not durable.
//!
//! Human-readable format: base58 of the raw bytes.

use rand::RngCore;
use std::fmt;
use std::str::FromStr;

use crate::error::IdError;

/// Number of bytes in a [`NodeId`].
pub const NODE_ID_LEN: usize = 16;

/// Opaque identifier of a node in the mesh.
///
/// Equality, hashing and ordering are byte-wise, which makes the id usable
/// directly as a map key and gives a deterministic total order for
/// tie-breaking.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; NODE_ID_LEN]);

impl NodeId {
    /// Generate a fresh random id.
    ///
    /// # Example
    /// ```
    /// use hopmesh_types::NodeId;
    ///
    /// let a = NodeId::generate();
    /// let b = NodeId::generate();
    /// assert_ne!(a, b);
    /// ```
    pub fn generate() -> Self {
        let mut bytes = [0u8; NODE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        // version 4
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        // RFC 4122 variant
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Self(bytes)
    }

    /// Create a NodeId from raw bytes.
    pub fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a NodeId from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; NODE_ID_LEN] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: NODE_ID_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Encode to the human-readable string form.
    pub fn encode(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// Decode from the human-readable string form.
    ///
    /// # Errors
    /// - `InvalidBase58` if the string is not valid base58
    /// - `InvalidLength` if the decoded data isn't 16 bytes
    pub fn decode(s: &str) -> Result<Self, IdError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| IdError::InvalidBase58(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Short prefix of the encoded form, for log lines.
    pub fn short(&self) -> String {
        let mut s = self.encode();
        s.truncate(8);
        s
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.encode())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for NodeId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_sets_version_and_variant() {
        for _ in 0..100 {
            let id = NodeId::generate();
            assert_eq!(id.0[6] >> 4, 0x4);
            assert_eq!(id.0[8] & 0xc0, 0x80);
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for _ in 0..100 {
            let id = NodeId::generate();
            let decoded = NodeId::decode(&id.encode()).unwrap();
            assert_eq!(decoded, id);
        }
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let ids: HashSet<NodeId> = (0..1000).map(|_| NodeId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_decode_invalid_base58() {
        let result = NodeId::decode("0OIl");
        assert!(matches!(result, Err(IdError::InvalidBase58(_))));
    }

    #[test]
    fn test_decode_wrong_length() {
        let encoded = bs58::encode([1u8; 8]).into_string();
        let result = NodeId::decode(&encoded);
        assert_eq!(
            result,
            Err(IdError::InvalidLength {
                expected: 16,
                actual: 8
            })
        );
    }

    #[test]
    fn test_from_str() {
        let id = NodeId::generate();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let low = NodeId::from_bytes([0u8; 16]);
        let mut high_bytes = [0u8; 16];
        high_bytes[0] = 1;
        let high = NodeId::from_bytes(high_bytes);
        assert!(low < high);
    }

    #[test]
    fn test_short_prefix() {
        let id = NodeId::generate();
        assert!(id.encode().starts_with(&id.short()));
        assert!(id.short().len() <= 8);
    }
}
