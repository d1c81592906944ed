//! # rpckit-protocol
//!
//! JSON-RPC 2.0 wire protocol implementation for rpckit.
//!
//! This crate provides:
//! - Request/Response/Notification message types
//! - Standard JSON-RPC error codes and the wire error object
//! - Pluggable framers (raw JSON stream, Content-Length headers, HTTP/1.1)
//! - A buffering decoder used by connection read loops

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{decode_message, encode_message, Decoder};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Framer, FramerKind, HeaderFramer, HttpFramer, RawFramer, ScanState};
pub use message::{Id, Message, Params, Request, Response, WireError};

/// JSON-RPC protocol version carried in every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Default port for the rpckit server.
pub const DEFAULT_PORT: u16 = 7410;

/// Maximum size of a single framed message (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
