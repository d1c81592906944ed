//! Built-in `rpc` diagnostic service.

use crate::error::{MethodError, RegistryError};
use crate::registry::{Service, ServiceRegistry};
use std::sync::{Arc, Weak};

/// Name of the diagnostic service.
pub const RPC_SERVICE: &str = "rpc";

/// Registers `rpc.ping` and `rpc.methods` on `registry`.
pub fn register(registry: &Arc<ServiceRegistry>) -> Result<(), RegistryError> {
    let weak: Weak<ServiceRegistry> = Arc::downgrade(registry);
    registry.register(
        Service::builder(RPC_SERVICE)
            .method("ping", |_ctx, _: ()| async move { Ok("pong") })
            .method("methods", move |_ctx, _: ()| {
                let registry = weak.upgrade();
                async move {
                    registry
                        .map(|r| r.describe())
                        .ok_or_else(|| MethodError::failed("registry dropped"))
                }
            }),
    )
}
