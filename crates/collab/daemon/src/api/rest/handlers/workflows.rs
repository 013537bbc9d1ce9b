//! Workflow handlers

use crate::access::{AccessDecision, Action, DenyReason};
use crate::api::rest::identity::Caller;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{validate_title, WorkflowUpdate};
use crate::storage::{SortOrder, WorkflowFilter, WorkflowSort, DEFAULT_LIST_LIMIT};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use collab_types::{
    HistoryEvent, HistoryEventType, MediaRef, Participant, ParticipantRole, TenantId, Transition,
    UserId, Workflow, WorkflowId, WorkflowMessage, WorkflowStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Parse a workflow id path segment
pub(super) fn parse_workflow_id(id: &str) -> ApiResult<WorkflowId> {
    WorkflowId::parse(id).map_err(|_| ApiError::BadRequest(format!("Invalid workflow ID: {}", id)))
}

/// Load a workflow and its participants or 404
pub(super) async fn load_workflow(
    state: &AppState,
    id: WorkflowId,
) -> ApiResult<(Workflow, Vec<Participant>)> {
    let workflow = state
        .storage
        .get_workflow(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Workflow {}", id)))?;
    let participants = state.storage.list_participants(&id).await?;
    Ok((workflow, participants))
}

/// Consult the gate; denials against an existing workflow are audited
pub(super) async fn authorize(
    state: &AppState,
    caller: &Caller,
    workflow: &Workflow,
    participants: &[Participant],
    action: Action,
) -> ApiResult<()> {
    let decision = state
        .gate
        .authorize(
            caller.user.as_ref(),
            caller.tenant.as_ref(),
            workflow,
            participants,
            action,
        )
        .await?;

    let AccessDecision::Deny(reason) = decision else {
        return Ok(());
    };

    if let (Some(user), false) = (&caller.user, reason == DenyReason::NotAuthenticated) {
        tracing::info!(
            workflow_id = %workflow.id,
            user = %user,
            action = %action,
            reason = reason.code(),
            "Access denied"
        );
        state
            .history
            .append(
                workflow.id,
                HistoryEventType::AccessDenied,
                user,
                json!({ "action": action, "reason": reason }),
            )
            .await;
    }

    Err(reason.into())
}

/// List workflows query params
#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub status: Option<WorkflowStatus>,
    pub participant: Option<String>,
    pub sort: Option<WorkflowSort>,
    pub order: Option<SortOrder>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// List workflows response
#[derive(Debug, Serialize)]
pub struct ListWorkflowsResponse {
    pub workflows: Vec<Workflow>,
    pub limit: usize,
    pub offset: usize,
}

/// List workflows visible to the caller
pub async fn list_workflows(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListWorkflowsQuery>,
) -> ApiResult<Json<ListWorkflowsResponse>> {
    let user = caller.require()?;
    let scope = state.gate.scope_for(user).await?;

    let mut filter = WorkflowFilter::visible_to(scope, Some(user.clone()))
        .with_limit(query.limit.unwrap_or(DEFAULT_LIST_LIMIT));
    filter.tenant = caller.tenant.clone();
    filter.status = query.status;
    filter.participant = query
        .participant
        .as_deref()
        .map(UserId::parse)
        .transpose()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    filter.sort = query.sort.unwrap_or_default();
    filter.order = query.order.unwrap_or_default();
    filter.offset = query.offset;

    let workflows = state.storage.list_workflows(&filter).await?;

    Ok(Json(ListWorkflowsResponse {
        workflows,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

/// Create workflow request
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub tenant_id: String,
    pub title: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// Create a workflow with the caller as initiator
pub async fn create_workflow(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowDetailResponse>)> {
    let user = caller.require()?;

    let tenant_id = req.tenant_id.trim();
    if tenant_id.is_empty() {
        return Err(ApiError::Validation("tenant_id must not be blank".into()));
    }
    let tenant = TenantId::new(tenant_id);
    if caller.tenant.as_ref().is_some_and(|t| t != &tenant) {
        return Err(ApiError::Forbidden(DenyReason::TenantMismatch));
    }

    state
        .gate
        .authorize_create(Some(user), &tenant)
        .await?
        .into_result()?;

    let title = validate_title(&req.title)?;
    let others = req
        .participants
        .iter()
        .map(|email| UserId::parse(email))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let workflow = Workflow::new(tenant, title, user.clone());
    let mut participants = vec![Participant::new(
        workflow.id,
        user.clone(),
        ParticipantRole::Initiator,
    )];
    for email in others {
        if participants.iter().all(|p| p.participant_email != email) {
            participants.push(Participant::new(workflow.id, email, ParticipantRole::Participant));
        }
    }

    state
        .storage
        .create_workflow(workflow.clone(), participants.clone())
        .await?;

    tracing::info!(
        workflow_id = %workflow.id,
        tenant = %workflow.tenant_id,
        user = %user,
        "Workflow created"
    );

    let emails: Vec<&str> = participants
        .iter()
        .map(|p| p.participant_email.as_str())
        .collect();
    state
        .history
        .append(
            workflow.id,
            HistoryEventType::WorkflowCreated,
            user,
            json!({ "title": workflow.title, "participants": emails }),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(WorkflowDetailResponse {
            workflow,
            participants,
            messages: Vec::new(),
            media: Vec::new(),
        }),
    ))
}

/// Workflow with participants and the recent message window
#[derive(Debug, Serialize)]
pub struct WorkflowDetailResponse {
    pub workflow: Workflow,
    pub participants: Vec<Participant>,
    /// Newest messages, oldest first
    pub messages: Vec<WorkflowMessage>,
    pub media: Vec<MediaRef>,
}

/// Get a workflow
pub async fn get_workflow(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowDetailResponse>> {
    caller.require()?;
    let id = parse_workflow_id(&id)?;
    let (workflow, participants) = load_workflow(&state, id).await?;
    authorize(&state, &caller, &workflow, &participants, Action::Read).await?;

    let messages = state
        .storage
        .list_recent_messages(&id, state.limits.recent_messages)
        .await?;
    let media = messages.iter().filter_map(|m| m.media_ref.clone()).collect();

    Ok(Json(WorkflowDetailResponse {
        workflow,
        participants,
        messages,
        media,
    }))
}

/// Update workflow request
#[derive(Debug, Deserialize)]
pub struct UpdateWorkflowRequest {
    pub action: Option<Transition>,
    pub status: Option<WorkflowStatus>,
    pub title: Option<String>,
}

/// Apply a transition and/or title change
pub async fn update_workflow(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateWorkflowRequest>,
) -> ApiResult<Json<Workflow>> {
    let user = caller.require()?;
    let id = parse_workflow_id(&id)?;
    let (workflow, participants) = load_workflow(&state, id).await?;

    let action = if req.action.is_some() || req.status.is_some() {
        Action::Transition
    } else {
        Action::UpdateTitle
    };
    authorize(&state, &caller, &workflow, &participants, action).await?;

    let update = WorkflowUpdate::from_request(req.action, req.status, req.title.as_deref())?;
    let updated = state.lifecycle.apply(id, &update, user).await?;

    Ok(Json(updated))
}

/// Get the audit trail of a workflow
pub async fn get_workflow_history(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<HistoryEvent>>> {
    caller.require()?;
    let id = parse_workflow_id(&id)?;
    let (workflow, participants) = load_workflow(&state, id).await?;
    authorize(&state, &caller, &workflow, &participants, Action::Read).await?;

    let history = state.storage.list_history(&id).await?;
    Ok(Json(history))
}
