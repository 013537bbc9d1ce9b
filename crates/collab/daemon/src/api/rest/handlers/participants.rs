//! Participant handlers

use super::workflows::{authorize, load_workflow, parse_workflow_id};
use crate::access::Action;
use crate::api::rest::identity::Caller;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use collab_types::{HistoryEventType, Participant, ParticipantRole, UserId};
use serde::Deserialize;
use serde_json::json;

/// Add participant request
#[derive(Debug, Deserialize)]
pub struct AddParticipantRequest {
    pub email: String,
}

/// Attach a user to a workflow; repeated adds return the existing row
pub async fn add_participant(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<AddParticipantRequest>,
) -> ApiResult<(StatusCode, Json<Participant>)> {
    let user = caller.require()?;
    let id = parse_workflow_id(&id)?;
    let (workflow, participants) = load_workflow(&state, id).await?;
    authorize(
        &state,
        &caller,
        &workflow,
        &participants,
        Action::ManageParticipants,
    )
    .await?;

    let email = UserId::parse(&req.email).map_err(|e| ApiError::Validation(e.to_string()))?;
    let (participant, inserted) = state
        .storage
        .add_participant(Participant::new(id, email, ParticipantRole::Participant))
        .await?;

    if !inserted {
        return Ok((StatusCode::OK, Json(participant)));
    }

    tracing::info!(
        workflow_id = %id,
        user = %user,
        participant = %participant.participant_email,
        "Participant added"
    );
    state
        .history
        .append(
            id,
            HistoryEventType::ParticipantAdded,
            user,
            json!({ "participant_email": participant.participant_email }),
        )
        .await;

    Ok((StatusCode::CREATED, Json(participant)))
}
