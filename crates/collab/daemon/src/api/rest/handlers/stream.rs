//! Workflow update stream handler
//!
//! Newline-delimited JSON by default; Server-Sent Events when the client
//! asks for `text/event-stream`.

use super::workflows::{authorize, load_workflow, parse_workflow_id};
use crate::access::Action;
use crate::api::rest::identity::Caller;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::stream::Subscription;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use chrono::{DateTime, Utc};
use collab_types::{MessageCursor, MessageId};
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// Resume position for a reconnecting client
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub after_id: Option<i64>,
    pub after_time: Option<DateTime<Utc>>,
}

impl StreamQuery {
    fn cursor(&self) -> ApiResult<Option<MessageCursor>> {
        match (self.after_id, self.after_time) {
            (Some(id), Some(time)) => Ok(Some(MessageCursor::new(time, MessageId::new(id)))),
            (None, None) => Ok(None),
            _ => Err(ApiError::Validation(
                "after_id and after_time must be given together".into(),
            )),
        }
    }
}

fn wants_sse(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(SSE_CONTENT_TYPE))
}

/// Subscribe to workflow updates
pub async fn stream_workflow(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user = caller.require()?;
    let id = parse_workflow_id(&id)?;
    let cursor = query.cursor()?;
    let (workflow, participants) = load_workflow(&state, id).await?;
    authorize(&state, &caller, &workflow, &participants, Action::Read).await?;

    tracing::info!(workflow_id = %id, user = %user, "Update stream opened");
    let subscription = state.streams.subscribe(&workflow, cursor).await;

    if wants_sse(&headers) {
        Ok(sse_response(subscription))
    } else {
        Ok(ndjson_response(subscription))
    }
}

fn sse_response(subscription: Subscription) -> Response {
    let events = subscription
        .into_stream()
        .map(|event| Event::default().event(event.kind()).json_data(&event));

    Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("ping"),
        )
        .into_response()
}

fn ndjson_response(subscription: Subscription) -> Response {
    let lines = subscription.into_stream().map(|event| {
        serde_json::to_vec(&event).map(|mut line| {
            line.push(b'\n');
            line
        })
    });

    (
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response()
}
