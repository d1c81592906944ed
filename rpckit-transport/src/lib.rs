//! # rpckit-transport
//!
//! JSON-RPC 2.0 message transport for rpckit.
//!
//! This crate provides:
//! - Cancellation contexts with optional deadlines
//! - Connections that correlate concurrent calls by id and dispatch
//!   inbound requests to a handler
//! - TCP and in-process pipe listeners/dialers
//! - An idle listener that shuts a server down when no client is connected
//! - `serve` / `dial` entry points

pub mod connection;
pub mod context;
pub mod error;
pub mod listener;
pub mod server;
pub mod stream;

pub use connection::{
    AsyncCall, Binder, Connection, ConnectionOptions, ConnectionState, Handler,
};
pub use context::{Context, ContextError};
pub use error::{HandlerError, TransportError};
pub use listener::{
    Dialer, IdleListener, Listener, PipeDialer, PipeListener, TcpDialer, TcpListener,
};
pub use server::{dial, serve, serve_with, ServeConfig, Server, ServerStats};
pub use stream::Stream;
