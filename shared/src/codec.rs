//! Frame codec shared by the hub and devices
//!
//! Every frame on the device socket is:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: JSON body ]
//! ```
//!
//! This keeps message boundaries intact over TCP streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::limits::MAX_FRAME_SIZE;

/// Framing or body failure
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    MessageTooLarge(usize),

    #[error("Frame length {0} exceeds the limit")]
    InvalidLength(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Whether the stream can keep being decoded after this error.
    ///
    /// A malformed body is consumed before it is parsed, so the next frame
    /// is still aligned. A bad length prefix leaves the stream unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CodecError::Json(_))
    }
}

/// Encode a message into a length-prefixed byte buffer
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    let body = serde_json::to_vec(message)?;

    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(CodecError::MessageTooLarge(body.len()));
    }

    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);

    Ok(buf.freeze())
}

/// Try to decode a length-prefixed message from a buffer
///
/// Returns:
/// - `Ok(Some(message))` if a complete message was decoded
/// - `Ok(None)` if the frame is still incomplete
/// - `Err(...)` on an oversize prefix or a body that is not valid JSON
pub fn decode<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(len));
    }

    if buf.len() < 4 + len as usize {
        return Ok(None);
    }

    buf.advance(4);
    let body = buf.split_to(len as usize);

    Ok(Some(serde_json::from_slice(&body)?))
}

/// Decoder state for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes received but not yet decoded
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes read from the socket
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, if one is buffered
    pub fn decode_next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
