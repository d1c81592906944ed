//! Transport error types.

use crate::context::ContextError;
use rpckit_protocol::{ErrorCode, ProtocolError, WireError};
use thiserror::Error;

/// Errors returned by connections, listeners and servers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Context(#[from] ContextError),

    /// The peer answered with an error object.
    #[error(transparent)]
    Remote(#[from] WireError),

    #[error("failed to encode params: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode result: {0}")]
    Decode(serde_json::Error),

    #[error("server shut down after idle timeout")]
    IdleTimeout,

    #[error("listener closed")]
    ListenerClosed,
}

impl TransportError {
    /// Returns whether the operation may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Io(_) | TransportError::ConnectionClosed => true,
            TransportError::Remote(err) => err.code.is_retryable(),
            _ => false,
        }
    }
}

/// Error returned by a [`Handler`](crate::Handler).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler exists for the method; reported as "method not found".
    #[error("method not handled")]
    NotHandled,

    #[error(transparent)]
    Rpc(#[from] WireError),
}

impl From<ContextError> for HandlerError {
    fn from(err: ContextError) -> Self {
        HandlerError::Rpc(WireError::new(ErrorCode::UNKNOWN_ERROR, err.to_string()))
    }
}
