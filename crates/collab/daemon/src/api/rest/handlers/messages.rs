//! Message posting handlers

use super::workflows::{authorize, load_workflow, parse_workflow_id};
use crate::access::Action;
use crate::api::rest::identity::Caller;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult, ConflictCode, StorageError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use collab_types::{MediaRef, NewMessage, WorkflowMessage};
use serde::Deserialize;
use serde_json::json;

/// Longest accepted message body, in characters
pub const MAX_MESSAGE_LEN: usize = 10_000;

/// Post message request
#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub body: String,
    pub media_ref: Option<MediaRef>,
}

fn validate_message(req: &PostMessageRequest) -> ApiResult<()> {
    if req.body.trim().is_empty() {
        return Err(ApiError::Validation("message body must not be blank".into()));
    }
    if req.body.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::Validation(format!(
            "message body must be at most {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    if let Some(media) = &req.media_ref {
        if media.object_key.trim().is_empty() {
            return Err(ApiError::Validation("media_ref.object_key must not be blank".into()));
        }
    }
    Ok(())
}

/// Post a message to an active workflow
pub async fn post_message(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowMessage>)> {
    let user = caller.require()?;
    let id = parse_workflow_id(&id)?;
    let (workflow, participants) = load_workflow(&state, id).await?;
    authorize(&state, &caller, &workflow, &participants, Action::PostMessage).await?;
    validate_message(&req)?;

    // Reject closed threads before the sender's slot is taken
    if !workflow.status.is_active() {
        return Err(StorageError::WorkflowNotActive {
            id,
            status: workflow.status,
        }
        .into());
    }

    if let Err(retry_after) = state.rate_limiter.check(user) {
        let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        tracing::info!(user = %user, retry_after_secs, "Message rate limited");
        return Err(ApiError::Conflict {
            code: ConflictCode::RateLimited,
            message: format!(
                "Only one message per {} seconds is allowed",
                state.rate_limiter.window().as_secs()
            ),
            details: Some(json!({ "retry_after_secs": retry_after_secs })),
        });
    }

    let message = NewMessage {
        workflow_id: id,
        sender_email: user.clone(),
        body: req.body,
        created_at: Utc::now(),
        media_ref: req.media_ref,
    };

    let stored = state.storage.insert_message(message).await?;
    tracing::debug!(
        workflow_id = %id,
        user = %user,
        message_id = %stored.id,
        "Message posted"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}
