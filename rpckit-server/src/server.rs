//! JSON-RPC server wiring configuration, registry and listener.

use crate::config::Config;
use crate::error::ServerError;
use crate::registry::ServiceRegistry;
use rpckit_transport::{
    serve_with, ConnectionOptions, IdleListener, Listener, ServeConfig, TcpListener,
    TransportError,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why [`RpcServer::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Shutdown was requested or the listener was closed.
    Requested,
    /// No client was connected for the configured idle timeout.
    IdleTimeout,
}

pub struct RpcServer {
    config: Config,
    registry: Arc<ServiceRegistry>,
}

impl RpcServer {
    pub fn new(config: Config, registry: Arc<ServiceRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Options applied to every accepted connection.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions::new()
            .with_framer(self.config.network.framer.framer())
            .with_handler(self.registry.clone())
            .with_read_buffer_size(self.config.network.read_buffer_size)
    }

    /// Binds the configured TCP address and serves until `shutdown` is
    /// cancelled or the idle timeout fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<ShutdownReason, ServerError> {
        let listener = TcpListener::bind(self.config.network.bind_addr).await?;
        tracing::info!(
            "Server listening on {} (framer={})",
            listener.local_addr(),
            self.config.network.framer
        );
        self.run_on(Arc::new(listener), shutdown).await
    }

    /// Serves connections accepted from `listener`.
    ///
    /// The configured idle timeout, if any, wraps `listener`.
    pub async fn run_on(
        &self,
        listener: Arc<dyn Listener>,
        shutdown: CancellationToken,
    ) -> Result<ShutdownReason, ServerError> {
        let listener: Arc<dyn Listener> = match self.config.network.idle_timeout() {
            Some(timeout) => {
                tracing::info!("Idle timeout {:?}", timeout);
                Arc::new(IdleListener::new(listener, timeout))
            }
            None => listener,
        };

        let server = serve_with(
            listener,
            Arc::new(self.connection_options()),
            ServeConfig::default().with_max_connections(self.config.network.max_connections),
        );
        let stop = server.shutdown_token();
        let wait = server.wait();
        tokio::pin!(wait);

        let result = tokio::select! {
            result = &mut wait => result,
            _ = shutdown.cancelled() => {
                stop.cancel();
                wait.await
            }
        };

        match result {
            Ok(()) => Ok(ShutdownReason::Requested),
            Err(TransportError::IdleTimeout) => {
                tracing::info!("Server idle, shutting down");
                Ok(ShutdownReason::IdleTimeout)
            }
            Err(e) => Err(e.into()),
        }
    }
}
