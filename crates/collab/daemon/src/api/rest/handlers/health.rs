//! Health and status handlers

use crate::api::rest::identity::Caller;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use crate::storage::WorkflowStats;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Counts across all tenants; system administrators only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflows: Option<WorkflowStats>,
    /// History appends that failed since start
    pub history_write_failures: u64,
}

/// Daemon status endpoint
pub async fn daemon_status(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Json<DaemonStatusResponse>> {
    let user = caller.require()?;
    let roles = state.gate.resolver().resolve_roles(user, None).await?;
    let workflows = if roles.is_system_admin {
        Some(state.storage.workflow_stats().await?)
    } else {
        None
    };
    let failures = state.history.failure_count();

    Ok(Json(DaemonStatusResponse {
        status: if failures == 0 { "healthy" } else { "degraded" }.to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        workflows,
        history_write_failures: failures,
    }))
}
