//! Message encoding and decoding.
//!
//! # Wire Format
//!
//! Every message is a sequence of CBOR items:
//!
//! ```text
//! [type: uint]            # Message type tag
//! [payload: CBOR item]    # Present only for payload-carrying types
//! ```
//!
//! Ping, Pong, Ok, Reject, Begin and Bye are encoded as the bare tag.
//! Bytes following the last expected item are ignored.

use hopmesh_types::constants::MAX_FRAME_SIZE;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::message::{MessageType, PeerMessage};

// =============================================================================
// Payload Encoding/Decoding
// =============================================================================

/// Encode a payload to CBOR.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    ciborium::into_writer(payload, &mut buf)?;

    if buf.len() > MAX_FRAME_SIZE {
        return Err(EncodeError::PayloadTooLarge {
            size: buf.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(buf)
}

/// Decode a CBOR payload.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    ciborium::from_reader(bytes).map_err(|e| DecodeError::PayloadDecodeFailed(e.to_string()))
}

// =============================================================================
// Message Encoding/Decoding
// =============================================================================

/// Encode a message to its wire form (without frame header).
///
/// # Example
/// ```
/// use hopmesh_wire::{decode_message, encode_message, PeerMessage};
///
/// let bytes = encode_message(&PeerMessage::Ping).unwrap();
/// assert_eq!(decode_message(&bytes).unwrap(), PeerMessage::Ping);
/// ```
pub fn encode_message(msg: &PeerMessage) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    ciborium::into_writer(&msg.message_type().tag(), &mut buf)?;

    match msg {
        PeerMessage::Ping
        | PeerMessage::Pong
        | PeerMessage::Ok
        | PeerMessage::Reject
        | PeerMessage::Begin
        | PeerMessage::Bye => {}
        PeerMessage::Hello(p) => ciborium::into_writer(p, &mut buf)?,
        PeerMessage::Select(p) => ciborium::into_writer(p, &mut buf)?,
        PeerMessage::Auth(p) => ciborium::into_writer(p, &mut buf)?,
        PeerMessage::AuthData(p) => ciborium::into_writer(p, &mut buf)?,
        PeerMessage::NodeSummary(p) => ciborium::into_writer(p, &mut buf)?,
        PeerMessage::NodeRequest(p) => ciborium::into_writer(p, &mut buf)?,
        PeerMessage::NodeDetails(p) => ciborium::into_writer(p, &mut buf)?,
        PeerMessage::Data(p) => ciborium::into_writer(p, &mut buf)?,
        PeerMessage::DataAck(p) | PeerMessage::DataReject(p) => {
            ciborium::into_writer(p, &mut buf)?
        }
    }

    if buf.len() > MAX_FRAME_SIZE {
        return Err(EncodeError::PayloadTooLarge {
            size: buf.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(buf)
}

/// Decode a message from its wire form.
///
/// # Errors
/// - `InvalidMessageType` if the tag is unknown
/// - `PayloadDecodeFailed` if the tag or payload is malformed or missing
pub fn decode_message(bytes: &[u8]) -> Result<PeerMessage, DecodeError> {
    let mut reader = bytes;
    let tag: u64 = ciborium::from_reader(&mut reader)?;
    let message_type = MessageType::from_tag(tag)?;

    let msg = match message_type {
        MessageType::Ping => PeerMessage::Ping,
        MessageType::Pong => PeerMessage::Pong,
        MessageType::Ok => PeerMessage::Ok,
        MessageType::Reject => PeerMessage::Reject,
        MessageType::Begin => PeerMessage::Begin,
        MessageType::Bye => PeerMessage::Bye,
        MessageType::Hello => PeerMessage::Hello(ciborium::from_reader(&mut reader)?),
        MessageType::Select => PeerMessage::Select(ciborium::from_reader(&mut reader)?),
        MessageType::Auth => PeerMessage::Auth(ciborium::from_reader(&mut reader)?),
        MessageType::AuthData => PeerMessage::AuthData(ciborium::from_reader(&mut reader)?),
        MessageType::NodeSummary => PeerMessage::NodeSummary(ciborium::from_reader(&mut reader)?),
        MessageType::NodeRequest => PeerMessage::NodeRequest(ciborium::from_reader(&mut reader)?),
        MessageType::NodeDetails => PeerMessage::NodeDetails(ciborium::from_reader(&mut reader)?),
        MessageType::Data => PeerMessage::Data(ciborium::from_reader(&mut reader)?),
        MessageType::DataAck => PeerMessage::DataAck(ciborium::from_reader(&mut reader)?),
        MessageType::DataReject => PeerMessage::DataReject(ciborium::from_reader(&mut reader)?),
    };

    Ok(msg)
}
