//! Collab Daemon - Multi-tenant collaborative workflow service
//!
//! The collab daemon provides:
//! - REST API for workflows, participants, messages and history
//! - Role-based access control scoped to tenants
//! - Lifecycle transitions with optimistic concurrency
//! - Polling update streams (SSE or NDJSON) per workflow

use clap::Parser;
use collab_daemon::{DaemonConfig, DaemonError, DaemonResult, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Collab Daemon CLI
#[derive(Parser)]
#[command(name = "collabd")]
#[command(about = "Collab Daemon - Multi-tenant collaborative workflow service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "COLLAB_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides configuration)
    #[arg(short, long, env = "COLLAB_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level (overrides configuration)
    #[arg(long, env = "COLLAB_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "COLLAB_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        storage = config.storage.kind(),
        "Starting collab daemon"
    );

    // Create and run server
    let server = Server::new(config).await?;
    server.run().await
}
