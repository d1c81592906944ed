//! Server error types.

use crate::config::ConfigError;
use rpckit_protocol::{ErrorCode, WireError};
use rpckit_transport::TransportError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors raised while registering services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no service name")]
    EmptyName,

    #[error("service {0} has no methods")]
    NoMethods(String),

    #[error("service already defined: {0}")]
    DuplicateService(String),

    #[error("method {method} defined twice on service {service}")]
    DuplicateMethod { service: String, method: String },

    #[error("invalid method name {0:?}")]
    InvalidMethodName(String),
}

/// Error returned by a registered method.
#[derive(Debug, Error)]
pub enum MethodError {
    /// Sent to the caller unchanged.
    #[error(transparent)]
    Rpc(#[from] WireError),

    /// Any other failure; reported with the catch-all error code.
    #[error("{0}")]
    Failed(String),
}

impl MethodError {
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        MethodError::Failed(msg.to_string())
    }

    /// Converts into the error object sent on the wire.
    pub fn into_wire(self) -> WireError {
        match self {
            MethodError::Rpc(e) => e,
            MethodError::Failed(msg) => WireError::new(ErrorCode::UNKNOWN_ERROR, msg),
        }
    }
}

impl From<serde_json::Error> for MethodError {
    fn from(e: serde_json::Error) -> Self {
        MethodError::Failed(e.to_string())
    }
}

impl From<TransportError> for MethodError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Remote(wire) => MethodError::Rpc(wire),
            other => MethodError::Failed(other.to_string()),
        }
    }
}
