//! # rpckit-client
//!
//! Typed RPC client binder for rpckit.
//!
//! Remote methods are declared once as [`Operation`]s and bound to a
//! [`Client`], which turns each declaration into a callable [`RemoteFn`].
//! Calls go out as JSON-RPC 2.0 requests (over an rpckit
//! [`Connection`](rpckit_transport::Connection) or HTTP POST) or as plain
//! REST requests, with optional per-method result caching.
//!
//! ```no_run
//! use rpckit_client::{rpc_client, Client, Operation};
//!
//! rpc_client! {
//!     pub struct Arith {
//!         add: fn(i64) -> i64 = Operation::new("Add"),
//!         version: fn() -> String = Operation::new("Version").cache("ttl:30s"),
//!     }
//! }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder("arith").http("http://127.0.0.1:7410").build()?;
//! let arith = Arith::bind(&client)?;
//! let sum = arith.add.call((2,)).await?;
//! let version = arith.version.call(()).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod descriptor;
pub mod error;
mod macros;
pub mod naming;
pub mod tags;

pub use cache::TtlCache;
pub use client::{Args, Client, ClientBuilder, ClientConfig, RemoteFn};
pub use descriptor::{CacheControl, MethodDescriptor, Operation, ParamShape, TransportKind};
pub use error::{BindError, CallError, ClientError, RemoteError};
pub use naming::NamingConvention;
