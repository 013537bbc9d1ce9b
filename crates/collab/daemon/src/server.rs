//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::storage::{InMemoryStorage, PostgresStorage, Storage};
use collab_types::UserId;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Collab Daemon Server
pub struct Server {
    config: DaemonConfig,
    storage: Arc<dyn Storage>,
}

impl Server {
    /// Create a new server with the given configuration
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let storage: Arc<dyn Storage> = match &config.storage {
            StorageConfig::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Arc::new(InMemoryStorage::new())
            }
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                let storage =
                    PostgresStorage::new(url, *max_connections, *connect_timeout_secs).await?;
                tracing::info!(max_connections, "Connected to PostgreSQL");
                Arc::new(storage)
            }
        };

        for email in &config.auth.bootstrap_admins {
            let user = UserId::parse(email).map_err(|e| DaemonError::Config(e.to_string()))?;
            storage.add_system_admin(&user).await?;
            tracing::info!(user = %user, "Registered system administrator");
        }

        Ok(Self { config, storage })
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(self.storage.clone(), &self.config);
        let app = create_router(state.clone(), &self.config.server);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Collab daemon listening on {}", addr);
        tracing::info!(
            poll_interval_ms = self.config.stream.poll_interval_ms,
            message_window_secs = self.config.limits.message_window_secs,
            "Update stream and rate limit settings"
        );

        // Open streams hold their connections; stop them before axum drains
        let streams = state.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                streams.shutdown();
            })
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!(
            history_write_failures = state.history.failure_count(),
            "Collab daemon shutting down"
        );

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
