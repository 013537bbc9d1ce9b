//! Application state for API handlers

use crate::access::{AccessGate, RoleResolver};
use crate::config::{AuthConfig, DaemonConfig, LimitsConfig};
use crate::history::HistoryLogger;
use crate::lifecycle::WorkflowStateMachine;
use crate::ratelimit::MessageRateLimiter;
use crate::storage::Storage;
use crate::stream::UpdateStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Storage backend
    pub storage: Arc<dyn Storage>,

    /// Authorization decision point
    pub gate: AccessGate,

    /// Status and title changes
    pub lifecycle: WorkflowStateMachine,

    /// Audit trail writer
    pub history: HistoryLogger,

    /// Update stream subscriptions
    pub streams: UpdateStream,

    /// Per-sender message throttle
    pub rate_limiter: Arc<MessageRateLimiter>,

    /// Identity header names
    pub auth: AuthConfig,

    pub limits: LimitsConfig,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,

    /// Graceful shutdown signal sender
    pub shutdown_tx: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Create new application state
    pub fn new(storage: Arc<dyn Storage>, config: &DaemonConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let history = HistoryLogger::new(storage.clone());

        Self {
            gate: AccessGate::new(RoleResolver::new(storage.clone())),
            lifecycle: WorkflowStateMachine::new(storage.clone(), history.clone()),
            streams: UpdateStream::new(storage.clone(), config.stream.clone(), shutdown_rx),
            rate_limiter: Arc::new(MessageRateLimiter::new(Duration::from_secs(
                config.limits.message_window_secs,
            ))),
            history,
            storage,
            auth: config.auth.clone(),
            limits: config.limits.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Signal every open update stream to stop
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
