//! Protocol error types and JSON-RPC error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("missing Content-Length header")]
    MissingContentLength,
}

/// JSON-RPC error code.
///
/// The reserved codes are part of the protocol contract; application errors
/// may use any other integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i64);

impl ErrorCode {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: ErrorCode = ErrorCode(-32700);
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: ErrorCode = ErrorCode(-32600);
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: ErrorCode = ErrorCode(-32601);
    /// Invalid method parameters.
    pub const INVALID_PARAMS: ErrorCode = ErrorCode(-32602);
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(-32603);
    /// The server cannot take more work right now.
    pub const SERVER_OVERLOADED: ErrorCode = ErrorCode(-32000);
    /// Catch-all for errors that carry no code of their own.
    pub const UNKNOWN_ERROR: ErrorCode = ErrorCode(-32001);
    /// The client side of the connection is shutting down.
    pub const CLIENT_CLOSING: ErrorCode = ErrorCode(-32003);
    /// The server side of the connection is shutting down.
    pub const SERVER_CLOSING: ErrorCode = ErrorCode(-32004);

    pub fn code(&self) -> i64 {
        self.0
    }

    /// Returns whether this code lies in the range reserved by JSON-RPC 2.0.
    pub fn is_reserved(&self) -> bool {
        (-32768..=-32000).contains(&self.0)
    }

    /// Returns whether a call that failed with this code may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            *self,
            ErrorCode::SERVER_OVERLOADED | ErrorCode::SERVER_CLOSING | ErrorCode::INTERNAL_ERROR
        )
    }

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            ErrorCode::PARSE_ERROR => "PARSE_ERROR",
            ErrorCode::INVALID_REQUEST => "INVALID_REQUEST",
            ErrorCode::METHOD_NOT_FOUND => "METHOD_NOT_FOUND",
            ErrorCode::INVALID_PARAMS => "INVALID_PARAMS",
            ErrorCode::INTERNAL_ERROR => "INTERNAL_ERROR",
            ErrorCode::SERVER_OVERLOADED => "SERVER_OVERLOADED",
            ErrorCode::UNKNOWN_ERROR => "UNKNOWN_ERROR",
            ErrorCode::CLIENT_CLOSING => "CLIENT_CLOSING",
            ErrorCode::SERVER_CLOSING => "SERVER_CLOSING",
            _ => return None,
        };
        Some(name)
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}
