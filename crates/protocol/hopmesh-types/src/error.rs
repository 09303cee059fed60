//! Error types for hopmesh-types

use thiserror::Error;

/// Errors that can occur when parsing or constructing a [`NodeId`](crate::NodeId).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdError {
    /// Invalid base58 encoding
    #[error("Invalid base58 encoding: {0}")]
    InvalidBase58(String),

    /// Decoded id has the wrong number of bytes
    #[error("Invalid id length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
