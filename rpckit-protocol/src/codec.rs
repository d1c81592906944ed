//! Message encoding and the buffering decoder used by read loops.

use crate::error::ProtocolError;
use crate::frame::{Framer, RawFramer, ScanState};
use crate::message::{Message, RawMessage};
use bytes::BytesMut;
use std::sync::Arc;

/// Serializes a message to JSON without any framing.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(msg)?)
}

/// Parses a single unframed JSON-RPC message.
pub fn decode_message(data: &[u8]) -> Result<Message, ProtocolError> {
    let raw: RawMessage = serde_json::from_slice(data)?;
    raw.into_message()
}

/// Accumulates bytes from a stream and yields framed messages.
pub struct Decoder {
    buffer: BytesMut,
    framer: Arc<dyn Framer>,
    scan: ScanState,
}

impl Decoder {
    pub fn new(framer: Arc<dyn Framer>) -> Self {
        Self::with_capacity(framer, 8192)
    }

    pub fn with_capacity(framer: Arc<dyn Framer>, capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            framer,
            scan: ScanState::default(),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next message from the buffer.
    ///
    /// A malformed frame is removed from the buffer before the error is
    /// returned, so callers may log it and keep decoding.
    ///
    /// Bytes of an incomplete frame are examined only once across calls.
    pub fn decode_message(&mut self) -> Result<Option<(Message, usize)>, ProtocolError> {
        self.framer.decode_resume(&mut self.buffer, &mut self.scan)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan = ScanState::default();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Arc::new(RawFramer))
    }
}
