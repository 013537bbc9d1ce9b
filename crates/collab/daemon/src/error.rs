//! Error types for collab-daemon

use crate::access::DenyReason;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use collab_types::{WorkflowId, WorkflowStatus};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (e.g., already exists)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Compare-and-swap on the workflow row lost a race
    #[error("Workflow {id} changed concurrently (expected version {expected})")]
    VersionConflict { id: WorkflowId, expected: i64 },

    /// Messages are only accepted while a workflow is active
    #[error("Workflow {id} is {status}, messages are no longer accepted")]
    WorkflowNotActive {
        id: WorkflowId,
        status: WorkflowStatus,
    },

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),
}

impl StorageError {
    /// I/O-level failures that are safe to retry
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Query(_))
    }
}

/// Machine-readable reasons attached to 409 responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCode {
    AlreadyInState,
    VersionConflict,
    RateLimited,
    WorkflowNotActive,
    Duplicate,
}

impl ConflictCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictCode::AlreadyInState => "ALREADY_IN_STATE",
            ConflictCode::VersionConflict => "VERSION_CONFLICT",
            ConflictCode::RateLimited => "RATE_LIMITED",
            ConflictCode::WorkflowNotActive => "WORKFLOW_NOT_ACTIVE",
            ConflictCode::Duplicate => "CONFLICT",
        }
    }
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// No caller identity on the request
    #[error("Authentication required")]
    Unauthenticated,

    /// Identity present, insufficient role
    #[error("Access denied: {0}")]
    Forbidden(DenyReason),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Malformed body or parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transition is not an edge of the lifecycle graph
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// State conflict
    #[error("Conflict: {message}")]
    Conflict {
        code: ConflictCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn conflict(code: ConflictCode, message: impl Into<String>) -> Self {
        ApiError::Conflict {
            code,
            message: message.into(),
            details: None,
        }
    }
}

impl From<DenyReason> for ApiError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::NotAuthenticated => ApiError::Unauthenticated,
            other => ApiError::Forbidden(other),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, "NOT_AUTHENTICATED"),
            ApiError::Forbidden(reason) => (StatusCode::FORBIDDEN, reason.code()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::InvalidTransition(_) => (StatusCode::BAD_REQUEST, "INVALID_TRANSITION"),
            ApiError::Conflict { code, .. } => (StatusCode::CONFLICT, code.as_str()),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Storage(StorageError::VersionConflict { .. }) => {
                (StatusCode::CONFLICT, ConflictCode::VersionConflict.as_str())
            }
            ApiError::Storage(StorageError::WorkflowNotActive { .. }) => {
                (StatusCode::CONFLICT, ConflictCode::WorkflowNotActive.as_str())
            }
            ApiError::Storage(StorageError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let details = match self {
            ApiError::Conflict { ref details, .. } => details.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::Unauthenticated.into_response().status(),
            StatusCode::UNAUTHORIZED
        );

        assert_eq!(
            ApiError::Forbidden(DenyReason::NotParticipant)
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );

        assert_eq!(
            ApiError::InvalidTransition("terminated -> completed".to_string())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );

        assert_eq!(
            ApiError::conflict(ConflictCode::RateLimited, "slow down")
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_storage_errors_map_by_kind() {
        let id = WorkflowId::generate();
        assert_eq!(
            ApiError::from(StorageError::VersionConflict { id, expected: 3 })
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(StorageError::Connection("refused".into()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(StorageError::Query("timeout".into()).is_transient());
        assert!(!StorageError::NotFound("x".into()).is_transient());
    }
}
