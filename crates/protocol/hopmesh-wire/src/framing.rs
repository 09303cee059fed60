//! Length-prefixed stream framing.
//!
//! # Wire format
//!
//! ```text
//! len < 24          [len: u8]              [payload]
//! len <= u8::MAX    [24] [len: u8]         [payload]
//! len <= u16::MAX   [25] [len: u16 BE]     [payload]
//! len <= u32::MAX   [26] [len: u32 BE]     [payload]
//! ```
//!
//! The header uses the same compact length scheme as CBOR unsigned
//! integers, so a frame header is readable as a CBOR uint.

use hopmesh_types::constants::MAX_FRAME_SIZE;

use crate::error::FrameError;

const MARKER_U8: u8 = 24;
const MARKER_U16: u8 = 25;
const MARKER_U32: u8 = 26;

/// Build the frame header for a payload of `len` bytes.
fn encode_header(len: usize, out: &mut Vec<u8>) {
    if len < MARKER_U8 as usize {
        out.push(len as u8);
    } else if len <= u8::MAX as usize {
        out.push(MARKER_U8);
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(MARKER_U16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(MARKER_U32);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// Prefix `payload` with its length header.
///
/// # Example
/// ```
/// use hopmesh_wire::encode_frame;
///
/// assert_eq!(encode_frame(&[7, 7]), vec![2, 7, 7]);
/// ```
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 5);
    encode_header(payload.len(), &mut buf);
    buf.extend_from_slice(payload);
    buf
}

/// Streaming frame decoder.
///
/// Bytes are appended with [`push`](Self::push) in whatever chunks the
/// transport delivers; complete frames are taken out with
/// [`next_frame`](Self::next_frame). Incomplete headers and payloads stay
/// buffered until the rest arrives.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder accepting frames up to `MAX_FRAME_SIZE`.
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom frame size limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    /// Append raw bytes from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Parse the header at the start of the buffer.
    ///
    /// Returns `(header_len, payload_len)`, or `None` if the header is not
    /// complete yet.
    fn parse_header(&self) -> Result<Option<(usize, usize)>, FrameError> {
        let Some(&first) = self.buffer.first() else {
            return Ok(None);
        };

        let (header_len, payload_len) = match first {
            n if n < MARKER_U8 => (1, n as usize),
            MARKER_U8 => match self.buffer.get(1) {
                Some(&n) => (2, n as usize),
                None => return Ok(None),
            },
            MARKER_U16 => match self.buffer.get(1..3) {
                Some(b) => (3, u16::from_be_bytes([b[0], b[1]]) as usize),
                None => return Ok(None),
            },
            MARKER_U32 => match self.buffer.get(1..5) {
                Some(b) => (5, u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize),
                None => return Ok(None),
            },
            other => return Err(FrameError::InvalidHeader(other)),
        };

        if payload_len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: payload_len,
                max: self.max_frame_size,
            });
        }

        Ok(Some((header_len, payload_len)))
    }

    /// Take the next complete frame payload out of the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some((header_len, payload_len)) = self.parse_header()? else {
            return Ok(None);
        };

        let total = header_len + payload_len;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let frame = self.buffer[header_len..total].to_vec();
        self.buffer.drain(..total);
        Ok(Some(frame))
    }

    /// Push a chunk and drain every frame that is now complete.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        self.push(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
