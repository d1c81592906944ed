//! rpckit - JSON-RPC 2.0 server
//!
//! Serves the registered services over TCP with the configured framing.

use rpckit_server::{builtin, Config, RpcServer, ServerError, ServiceRegistry, ShutdownReason};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if RPCKIT_CONFIG is set, then env overrides)
    let config_path = std::env::var("RPCKIT_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Ignoring invalid environment overrides: {}", e);
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting rpckit server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Framing: {}", config.network.framer);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    match config.network.idle_timeout() {
        Some(timeout) => tracing::info!("  Idle timeout: {:?}", timeout),
        None => tracing::info!("  Idle timeout: disabled"),
    }

    let registry = Arc::new(ServiceRegistry::new());
    builtin::register(&registry)?;
    tracing::info!("  Methods: {}", registry.describe().join(", "));

    let server = RpcServer::new(config, registry);

    // Spawn shutdown signal handler
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal, stopping server...");
            shutdown.cancel();
        });
    }

    // Run server (blocks until shutdown or idle timeout)
    match server.run(shutdown).await? {
        ShutdownReason::Requested => tracing::info!("Server stopped"),
        ShutdownReason::IdleTimeout => tracing::info!("Server stopped after idle timeout"),
    }
    Ok(())
}
