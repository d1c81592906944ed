//! Message framing.
//!
//! A [`Framer`] turns a byte stream into a sequence of messages and back.
//! Three framings are provided:
//!
//! ```text
//! raw     {"jsonrpc":"2.0",...}\n{"jsonrpc":"2.0",...}\n
//! header  Content-Length: N\r\n\r\n<N bytes of JSON>
//! http    POST / HTTP/1.1\r\n...Content-Length: N\r\n\r\n<N bytes of JSON>
//! ```
//!
//! All framers consume the bytes of a malformed frame before reporting the
//! error so that the next call makes progress.

use crate::codec::decode_message;
use crate::error::ProtocolError;
use crate::message::Message;
use crate::MAX_MESSAGE_SIZE;
use bytes::{Buf, BufMut, BytesMut};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Upper bound on the header section of header/http framed messages.
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Splits a byte stream into JSON-RPC messages.
pub trait Framer: Send + Sync + fmt::Debug {
    /// Attempts to decode one message from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On success the frame is
    /// removed from `buf` and the number of consumed bytes is returned with
    /// the message.
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<(Message, usize)>, ProtocolError>;

    /// Like [`decode`](Framer::decode), but continues from `scan`, the
    /// progress made by earlier calls on the same buffer. Bytes may only be
    /// appended to `buf` between calls.
    fn decode_resume(
        &self,
        buf: &mut BytesMut,
        scan: &mut ScanState,
    ) -> Result<Option<(Message, usize)>, ProtocolError> {
        let _ = scan;
        self.decode(buf)
    }

    /// Appends the framed encoding of `msg` to `dst`, returning the number of
    /// bytes written.
    fn encode(&self, msg: &Message, dst: &mut BytesMut) -> Result<usize, ProtocolError>;

    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;
}

/// Selects one of the built-in framers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramerKind {
    #[default]
    Raw,
    Header,
    Http,
}

impl FramerKind {
    pub fn framer(&self) -> Arc<dyn Framer> {
        match self {
            FramerKind::Raw => Arc::new(RawFramer),
            FramerKind::Header => Arc::new(HeaderFramer),
            FramerKind::Http => Arc::new(HttpFramer),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FramerKind::Raw => "raw",
            FramerKind::Header => "header",
            FramerKind::Http => "http",
        }
    }
}

impl fmt::Display for FramerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FramerKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(FramerKind::Raw),
            "header" => Ok(FramerKind::Header),
            "http" => Ok(FramerKind::Http),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown framer {:?}",
                other
            ))),
        }
    }
}

/// Back-to-back JSON values with no delimiter requirements.
///
/// Encoding appends a newline after each message; decoding accepts any
/// whitespace between values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFramer;

/// How far a partially received frame has been examined.
///
/// Owned by whoever owns the buffer; see [`Framer::decode_resume`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanState {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ScanState {
    /// Bytes at the front of the buffer already examined.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

enum Scan {
    Complete(usize),
    Incomplete,
    /// A raw line break inside a string; the frame ends after it.
    Broken(usize),
}

/// Finds the end of the object or array starting at `bytes[0]`, continuing
/// from where `scan` stopped.
fn scan_value(bytes: &[u8], scan: &mut ScanState) -> Scan {
    for (offset, &b) in bytes[scan.pos..].iter().enumerate() {
        let i = scan.pos + offset;
        if scan.in_string {
            if scan.escaped {
                scan.escaped = false;
            } else if b == b'\\' {
                scan.escaped = true;
            } else if b == b'"' {
                scan.in_string = false;
            } else if b == b'\n' {
                scan.reset();
                return Scan::Broken(i + 1);
            }
            continue;
        }
        match b {
            b'"' => scan.in_string = true,
            b'{' | b'[' => scan.depth += 1,
            b'}' | b']' => {
                scan.depth = scan.depth.saturating_sub(1);
                if scan.depth == 0 {
                    scan.reset();
                    return Scan::Complete(i + 1);
                }
            }
            _ => {}
        }
    }
    scan.pos = bytes.len();
    Scan::Incomplete
}

impl Framer for RawFramer {
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<(Message, usize)>, ProtocolError> {
        self.decode_resume(buf, &mut ScanState::default())
    }

    fn decode_resume(
        &self,
        buf: &mut BytesMut,
        scan: &mut ScanState,
    ) -> Result<Option<(Message, usize)>, ProtocolError> {
        let mut skipped = 0;
        if scan.pos == 0 {
            skipped = match buf.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(start) => start,
                None => {
                    buf.clear();
                    return Ok(None);
                }
            };
            buf.advance(skipped);
        }

        if !matches!(buf[0], b'{' | b'[') {
            return decode_scalar(buf).map(|decoded| {
                decoded.map(|(message, consumed)| (message, skipped + consumed))
            });
        }

        match scan_value(buf, scan) {
            Scan::Complete(end) => {
                let frame = buf.split_to(end);
                let message = decode_message(&frame)?;
                Ok(Some((message, skipped + end)))
            }
            Scan::Broken(end) => {
                buf.advance(end);
                Err(ProtocolError::InvalidMessage(
                    "line break inside JSON string".to_string(),
                ))
            }
            Scan::Incomplete if buf.len() > MAX_MESSAGE_SIZE => {
                let size = buf.len();
                buf.clear();
                scan.reset();
                Err(ProtocolError::MessageTooLarge {
                    size,
                    max: MAX_MESSAGE_SIZE,
                })
            }
            Scan::Incomplete => Ok(None),
        }
    }

    fn encode(&self, msg: &Message, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        let body = serde_json::to_vec(msg)?;
        check_size(body.len())?;
        dst.reserve(body.len() + 1);
        dst.put_slice(&body);
        dst.put_u8(b'\n');
        Ok(body.len() + 1)
    }

    fn name(&self) -> &'static str {
        "raw"
    }
}

/// Top-level values other than objects and arrays are never valid messages,
/// but still have to be consumed.
fn decode_scalar(buf: &mut BytesMut) -> Result<Option<(Message, usize)>, ProtocolError> {
    let (next, offset) = {
        let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<IgnoredAny>();
        let next = values.next();
        (next, values.byte_offset())
    };

    match next {
        None => Ok(None),
        Some(Ok(_)) => {
            let frame = buf.split_to(offset);
            decode_message(&frame).map(|message| Some((message, offset)))
        }
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => {
            // Resynchronize on the next line.
            let skip = buf
                .iter()
                .position(|&b| b == b'\n')
                .map(|pos| pos + 1)
                .unwrap_or(buf.len());
            buf.advance(skip);
            Err(ProtocolError::Json(e))
        }
    }
}

/// `Content-Length` delimited messages, as used by language servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderFramer;

impl Framer for HeaderFramer {
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<(Message, usize)>, ProtocolError> {
        decode_delimited(buf, false)
    }

    fn encode(&self, msg: &Message, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        let body = serde_json::to_vec(msg)?;
        check_size(body.len())?;
        let head = format!("Content-Length: {}\r\n\r\n", body.len());
        Ok(put_frame(dst, &head, &body))
    }

    fn name(&self) -> &'static str {
        "header"
    }
}

/// One JSON-RPC message per HTTP/1.1 exchange.
///
/// Requests and notifications are written as `POST /` requests, responses as
/// `200 OK` responses. Only `Content-Length` bodies are understood.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFramer;

impl Framer for HttpFramer {
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<(Message, usize)>, ProtocolError> {
        decode_delimited(buf, true)
    }

    fn encode(&self, msg: &Message, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        let body = serde_json::to_vec(msg)?;
        check_size(body.len())?;
        let head = match msg {
            Message::Request(_) => format!(
                "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                body.len()
            ),
            Message::Response(_) => format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                body.len()
            ),
        };
        Ok(put_frame(dst, &head, &body))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn check_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

fn put_frame(dst: &mut BytesMut, head: &str, body: &[u8]) -> usize {
    dst.reserve(head.len() + body.len());
    dst.put_slice(head.as_bytes());
    dst.put_slice(body);
    head.len() + body.len()
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Decodes a header section followed by a `Content-Length` body.
fn decode_delimited(
    buf: &mut BytesMut,
    start_line: bool,
) -> Result<Option<(Message, usize)>, ProtocolError> {
    let head_len = match find_header_end(buf) {
        Some(len) => len,
        None if buf.len() > MAX_HEADER_SIZE => {
            buf.clear();
            return Err(ProtocolError::InvalidHeader(
                "header section too large".to_string(),
            ));
        }
        None => return Ok(None),
    };

    let content_length = match parse_head(&buf[..head_len - HEADER_TERMINATOR.len()], start_line)
    {
        Ok(len) => len,
        Err(e) => {
            buf.advance(head_len);
            return Err(e);
        }
    };

    if content_length > MAX_MESSAGE_SIZE {
        // The body cannot be skipped reliably; drop everything buffered.
        buf.clear();
        return Err(ProtocolError::MessageTooLarge {
            size: content_length,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let total = head_len + content_length;
    if buf.len() < total {
        return Ok(None);
    }

    let frame = buf.split_to(total);
    let message = decode_message(&frame[head_len..])?;
    Ok(Some((message, total)))
}

/// Parses the header lines and returns the declared body length.
fn parse_head(head: &[u8], start_line: bool) -> Result<usize, ProtocolError> {
    let text = std::str::from_utf8(head).map_err(|_| ProtocolError::InvalidUtf8)?;
    let mut lines = text.split("\r\n");

    if start_line {
        let line = lines.next().unwrap_or_default();
        let is_status = line.starts_with("HTTP/1.");
        let is_request = line.split(' ').nth(2).is_some_and(|v| v.starts_with("HTTP/1."));
        if !is_status && !is_request {
            return Err(ProtocolError::InvalidHeader(format!(
                "malformed start line {:?}",
                line
            )));
        }
    }

    let mut content_length = None;
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidHeader(line.to_string()))?;
        let (name, value) = (name.trim(), value.trim());

        if name.eq_ignore_ascii_case("content-length") {
            let len = value.parse::<usize>().map_err(|_| {
                ProtocolError::InvalidHeader(format!("bad Content-Length {:?}", value))
            })?;
            content_length = Some(len);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(ProtocolError::InvalidHeader(format!(
                "unsupported Transfer-Encoding {:?}",
                value
            )));
        }
    }

    content_length.ok_or(ProtocolError::MissingContentLength)
}
