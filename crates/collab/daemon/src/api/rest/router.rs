//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let request_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        // Workflows
        .route(
            "/workflows",
            get(handlers::list_workflows).post(handlers::create_workflow),
        )
        .route(
            "/workflows/:id",
            get(handlers::get_workflow).put(handlers::update_workflow),
        )
        .route("/workflows/:id/history", get(handlers::get_workflow_history))
        .route("/workflows/:id/messages", post(handlers::post_message))
        .route("/workflows/:id/participants", post(handlers::add_participant))
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_secs,
        )));

    // Long-lived; not subject to the request timeout
    let stream_routes =
        Router::new().route("/workflows/:id/stream", get(handlers::stream_workflow));

    let mut router = Router::new()
        .nest("/api/v1", request_routes.merge(stream_routes))
        .layer(TraceLayer::new_for_http());

    if server.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}
