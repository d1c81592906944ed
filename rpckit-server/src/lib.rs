//! # rpckit-server
//!
//! JSON-RPC server for rpckit.
//!
//! This crate provides:
//! - A service registry mapping `service.method` names to typed async methods
//! - A dispatcher usable as a connection handler
//! - YAML/environment configuration
//! - `RpcServer`, which wires configuration, registry and listener together

pub mod builtin;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;

pub use config::{Config, ConfigError, NetworkConfig};
pub use error::{MethodError, RegistryError, ServerError};
pub use registry::{Service, ServiceBuilder, ServiceRegistry, DEFAULT_SERVICE};
pub use server::{RpcServer, ShutdownReason};
