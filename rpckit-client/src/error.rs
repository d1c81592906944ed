//! Client error types.
//!
//! Setup problems surface as [`BindError`] when a method is bound; every
//! failure at call time is a [`CallError`].

use crate::tags::TagError;
use rpckit_protocol::{Id, ProtocolError, WireError};
use rpckit_transport::{ContextError, TransportError};
use thiserror::Error;

/// Errors raised while building a client or binding a method.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("empty slot name")]
    EmptySlot,

    #[error("{0}: empty method name")]
    EmptyName(String),

    #[error("{slot}: invalid HTTP verb {verb:?}")]
    InvalidVerb { slot: String, verb: String },

    #[error("{slot}: unknown rpc type {value:?} (expected jsonrpc2 or rest)")]
    UnknownTransport { slot: String, value: String },

    #[error("{slot}: unknown param container {value:?} (expected array or object)")]
    UnknownContainer { slot: String, value: String },

    #[error("{slot}: invalid cache settings: {reason}")]
    InvalidCache { slot: String, reason: String },

    #[error("{slot}: malformed tag: {source}")]
    MalformedTag {
        slot: String,
        #[source]
        source: TagError,
    },

    #[error("{0}: rest calls need an HTTP endpoint")]
    NoRestBackend(String),

    #[error("client has no endpoint")]
    NoBackend,

    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    #[error("failed to create HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cache sweeping needs a running tokio runtime")]
    NoRuntime,
}

/// A failure on the calling side.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to encode params: {0}")]
    Encode(serde_json::Error),

    #[error("invalid params: {0}")]
    Params(String),

    #[error("transport: {0}")]
    Transport(TransportError),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("response id {actual:?} does not match request id {expected}")]
    IdMismatch { expected: Id, actual: Option<Id> },

    #[error("failed to decode result: {0}")]
    Decode(serde_json::Error),

    #[error("no HTTP endpoint configured")]
    NoEndpoint,
}

/// A failure reported by the server.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// JSON-RPC error object.
    #[error(transparent)]
    Rpc(#[from] WireError),

    /// Non-2xx HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors returned by a bound remote method.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("RPC client error: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Server(#[from] RemoteError),
}

impl CallError {
    /// Returns whether the call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Client(ClientError::Transport(e)) => e.is_retryable(),
            CallError::Client(ClientError::Http(e)) => e.is_connect() || e.is_timeout(),
            CallError::Server(RemoteError::Rpc(e)) => e.code.is_retryable(),
            CallError::Server(RemoteError::Status { status, .. }) => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }

    /// Returns the JSON-RPC error object, if the server sent one.
    pub fn wire_error(&self) -> Option<&WireError> {
        match self {
            CallError::Server(RemoteError::Rpc(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for CallError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Context(ctx) => CallError::Context(ctx),
            TransportError::Remote(wire) => CallError::Server(RemoteError::Rpc(wire)),
            other => CallError::Client(ClientError::Transport(other)),
        }
    }
}
