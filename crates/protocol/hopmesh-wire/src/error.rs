//! Error types for the wire protocol module.
//!
//! This module defines errors that can occur during message encoding,
//! decoding, and stream framing.

use thiserror::Error;

/// Errors that can occur when encoding a message or payload.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// CBOR encoding failed
    #[error("CBOR encoding failed: {0}")]
    Cbor(String),

    /// Payload exceeds maximum allowed size
    #[error("payload too large: {size} bytes exceeds maximum {max} bytes")]
    PayloadTooLarge {
        /// Actual size of the payload
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}

impl From<ciborium::ser::Error<std::io::Error>> for EncodeError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        EncodeError::Cbor(err.to_string())
    }
}

/// Errors that can occur when decoding a message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// Unknown message type tag
    #[error("invalid message type: {0}")]
    InvalidMessageType(u64),

    /// Failed to decode CBOR payload
    #[error("payload decode failed: {0}")]
    PayloadDecodeFailed(String),
}

impl From<ciborium::de::Error<std::io::Error>> for DecodeError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        DecodeError::PayloadDecodeFailed(err.to_string())
    }
}

/// Errors raised by the stream frame decoder.
///
/// Partial data is never an error; these only signal a corrupt stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    /// First header byte is not a known size marker
    #[error("invalid frame header marker: {0:#04x}")]
    InvalidHeader(u8),

    /// Frame length exceeds the configured maximum
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    TooLarge {
        /// Announced frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}
