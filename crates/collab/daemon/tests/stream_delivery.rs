//! Update stream delivery tests.
//!
//! Drives `/workflows/{id}/stream` over NDJSON with the tokio clock paused,
//! so poll ticks advance as soon as the test is idle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::body::{Body, BodyDataStream};
use axum::http::{header, Method, Request, StatusCode};
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use collab_daemon::api::{create_router, AppState};
use collab_daemon::storage::{InMemoryStorage, MessageStorage, RoleStorage};
use collab_daemon::DaemonConfig;
use collab_types::{
    MessageCursor, NewMessage, Role, RoleGrant, StreamEvent, TenantId, UserId, WorkflowId,
    WorkflowStatus,
};

const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@example.com";
const CAROL: &str = "carol@example.com";

struct Harness {
    router: axum::Router,
    state: AppState,
    storage: Arc<InMemoryStorage>,
    workflow_id: WorkflowId,
}

impl Harness {
    /// Tenant t1 with alice and bob as members; alice opens a workflow with bob
    async fn new() -> Result<Self> {
        let storage = Arc::new(InMemoryStorage::new());
        for email in [ALICE, BOB] {
            storage
                .grant_role(RoleGrant::new(TenantId::new("t1"), UserId::new(email), Role::Member))
                .await?;
        }

        let config = DaemonConfig::development();
        let state = AppState::new(storage.clone(), &config);
        let router = create_router(state.clone(), &config.server);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/workflows")
            .header("x-user-email", ALICE)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json!({
                "tenant_id": "t1",
                "title": "Vendor review",
                "participants": [BOB],
            }))?))?;
        let response = router.clone().oneshot(request).await.map_err(|err| -> anyhow::Error { match err {} })?;
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body: Value = serde_json::from_slice(&bytes)?;
        let workflow_id = WorkflowId::parse(body["workflow"]["id"].as_str().context("id")?)?;

        Ok(Self {
            router,
            state,
            storage,
            workflow_id,
        })
    }

    async fn open_stream(&self, user: &str, query: &str) -> Result<axum::response::Response> {
        let request = Request::builder()
            .uri(format!("/api/v1/workflows/{}/stream{}", self.workflow_id, query))
            .header("x-user-email", user)
            .header(header::ACCEPT, "application/x-ndjson")
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| -> anyhow::Error { match err {} })?)
    }

    async fn subscribe(&self, user: &str, query: &str) -> Result<EventReader> {
        let response = self.open_stream(user, query).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(b"application/x-ndjson".as_slice())
        );
        Ok(EventReader::new(response.into_body().into_data_stream()))
    }

    async fn post_as(&self, user: &str, body: &str) -> Result<Value> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/workflows/{}/messages", self.workflow_id))
            .header("x-user-email", user)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json!({ "body": body }))?))?;
        let response = self.router.clone().oneshot(request).await.map_err(|err| -> anyhow::Error { match err {} })?;
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Splits an NDJSON body into stream events
struct EventReader {
    body: BodyDataStream,
    buffer: Vec<u8>,
}

impl EventReader {
    fn new(body: BodyDataStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
        }
    }

    async fn next(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                return Ok(Some(serde_json::from_slice(&line[..pos])?));
            }
            match self.body.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None if self.buffer.is_empty() => return Ok(None),
                None => bail!("stream ended mid-line"),
            }
        }
    }

    async fn expect(&mut self) -> Result<StreamEvent> {
        self.next().await?.context("stream ended early")
    }
}

#[tokio::test(start_paused = true)]
async fn test_message_is_delivered_exactly_once() -> Result<()> {
    let harness = Harness::new().await?;
    let mut events = harness.subscribe(BOB, "").await?;

    assert!(matches!(events.expect().await?, StreamEvent::Connected { .. }));
    assert!(matches!(events.expect().await?, StreamEvent::StatusUpdate { .. }));

    let posted = harness.post_as(ALICE, "Contract draft is up").await?;
    let posted_id = posted["id"].as_i64().context("message id")?;

    let mut deliveries = 0;
    let mut heartbeats = 0;
    while heartbeats < 4 {
        match events.expect().await? {
            StreamEvent::Message { message } => {
                assert_eq!(message.id.value(), posted_id);
                assert_eq!(message.body, "Contract draft is up");
                assert_eq!(heartbeats, 0, "message must arrive on the next tick");
                deliveries += 1;
            }
            StreamEvent::StatusUpdate { .. } => heartbeats += 1,
            other => bail!("unexpected event {:?}", other),
        }
    }
    assert_eq!(deliveries, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_fresh_subscription_receives_existing_thread() -> Result<()> {
    let harness = Harness::new().await?;
    harness.post_as(ALICE, "first").await?;
    harness.post_as(BOB, "second").await?;

    let mut events = harness.subscribe(BOB, "").await?;
    assert!(matches!(events.expect().await?, StreamEvent::Connected { .. }));

    let mut bodies = Vec::new();
    loop {
        match events.expect().await? {
            StreamEvent::Message { message } => bodies.push(message.body),
            StreamEvent::StatusUpdate { .. } => break,
            other => bail!("unexpected event {:?}", other),
        }
    }
    assert_eq!(bodies, vec!["first", "second"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_resume_query_skips_delivered_messages() -> Result<()> {
    let harness = Harness::new().await?;
    let seen = harness.post_as(ALICE, "already seen").await?;
    harness.post_as(BOB, "missed while offline").await?;

    let query = format!(
        "?after_id={}&after_time={}",
        seen["id"],
        urlencode(seen["created_at"].as_str().context("created_at")?)
    );
    let mut events = harness.subscribe(BOB, &query).await?;
    assert!(matches!(events.expect().await?, StreamEvent::Connected { .. }));

    match events.expect().await? {
        StreamEvent::Message { message } => assert_eq!(message.body, "missed while offline"),
        other => bail!("expected message, got {:?}", other),
    }
    assert!(matches!(events.expect().await?, StreamEvent::StatusUpdate { .. }));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cursor_orders_messages_sharing_a_timestamp() -> Result<()> {
    let harness = Harness::new().await?;
    let mut events = harness.subscribe(BOB, "").await?;
    assert!(matches!(events.expect().await?, StreamEvent::Connected { .. }));
    assert!(matches!(events.expect().await?, StreamEvent::StatusUpdate { .. }));

    let now = Utc::now();
    for n in 0..5 {
        harness
            .storage
            .insert_message(NewMessage {
                workflow_id: harness.workflow_id,
                sender_email: UserId::new(ALICE),
                body: format!("burst {n}"),
                created_at: now,
                media_ref: None,
            })
            .await?;
    }

    let mut cursors: Vec<MessageCursor> = Vec::new();
    loop {
        match events.expect().await? {
            StreamEvent::Message { message } => cursors.push(message.cursor()),
            StreamEvent::StatusUpdate { .. } if !cursors.is_empty() => break,
            StreamEvent::StatusUpdate { .. } => continue,
            other => bail!("unexpected event {:?}", other),
        }
    }

    assert_eq!(cursors.len(), 5);
    assert!(cursors.windows(2).all(|pair| pair[0] < pair[1]));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_late_commit_with_earlier_stamp_is_still_delivered() -> Result<()> {
    let harness = Harness::new().await?;
    let mut events = harness.subscribe(BOB, "").await?;
    assert!(matches!(events.expect().await?, StreamEvent::Connected { .. }));
    assert!(matches!(events.expect().await?, StreamEvent::StatusUpdate { .. }));

    let stamped_early = Utc::now();
    harness.post_as(ALICE, "committed first").await?;
    loop {
        match events.expect().await? {
            StreamEvent::Message { message } => {
                assert_eq!(message.body, "committed first");
                break;
            }
            StreamEvent::StatusUpdate { .. } => continue,
            other => bail!("unexpected event {:?}", other),
        }
    }

    // A writer that read the clock before the delivered post commits after it
    let late = harness
        .storage
        .insert_message(NewMessage {
            workflow_id: harness.workflow_id,
            sender_email: UserId::new(BOB),
            body: "committed second".into(),
            created_at: stamped_early - chrono::Duration::seconds(5),
            media_ref: None,
        })
        .await?;
    assert!(late.created_at >= stamped_early);

    loop {
        match events.expect().await? {
            StreamEvent::Message { message } => {
                assert_eq!(message.id, late.id);
                assert_eq!(message.body, "committed second");
                break;
            }
            StreamEvent::StatusUpdate { .. } => continue,
            other => bail!("unexpected event {:?}", other),
        }
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_is_reported_and_stream_continues() -> Result<()> {
    let harness = Harness::new().await?;
    let mut events = harness.subscribe(BOB, "").await?;
    assert!(matches!(events.expect().await?, StreamEvent::Connected { .. }));
    assert!(matches!(events.expect().await?, StreamEvent::StatusUpdate { .. }));

    harness.post_as(ALICE, "during outage").await?;
    harness.storage.fail_next_reads(2);

    let mut errors = 0;
    loop {
        match events.expect().await? {
            StreamEvent::Error { code, .. } => {
                assert_eq!(code, "TRANSIENT");
                errors += 1;
            }
            StreamEvent::Message { message } => {
                assert_eq!(message.body, "during outage");
                break;
            }
            StreamEvent::StatusUpdate { .. } => {}
            other => bail!("unexpected event {:?}", other),
        }
    }
    assert_eq!(errors, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_status_changes_reach_subscribers() -> Result<()> {
    let harness = Harness::new().await?;
    let mut events = harness.subscribe(BOB, "").await?;
    assert!(matches!(events.expect().await?, StreamEvent::Connected { .. }));

    let request = Request::builder()
        .method(Method::PUT)
        .uri(format!("/api/v1/workflows/{}", harness.workflow_id))
        .header("x-user-email", ALICE)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "action": "complete" }))?))?;
    let response = harness.router.clone().oneshot(request).await.map_err(|err| -> anyhow::Error { match err {} })?;
    assert_eq!(response.status(), StatusCode::OK);

    loop {
        if let StreamEvent::StatusUpdate { status, .. } = events.expect().await? {
            if status == WorkflowStatus::Completed {
                break;
            }
        }
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_open_streams() -> Result<()> {
    let harness = Harness::new().await?;
    let mut events = harness.subscribe(BOB, "").await?;
    assert!(matches!(events.expect().await?, StreamEvent::Connected { .. }));

    harness.state.shutdown();
    tokio::time::sleep(Duration::from_secs(5)).await;

    while let Some(event) = events.next().await? {
        assert!(!matches!(event, StreamEvent::Connected { .. }));
    }
    Ok(())
}

#[tokio::test]
async fn test_stream_requires_read_access() -> Result<()> {
    let harness = Harness::new().await?;

    let response = harness.open_stream(CAROL, "").await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn test_partial_resume_cursor_is_rejected() -> Result<()> {
    let harness = Harness::new().await?;

    let response = harness.open_stream(BOB, "?after_id=3").await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_default_format_is_ndjson() -> Result<()> {
    let harness = Harness::new().await?;
    let request = Request::builder()
        .uri(format!("/api/v1/workflows/{}/stream", harness.workflow_id))
        .header("x-user-email", BOB)
        .body(Body::empty())?;
    let response = harness.router.clone().oneshot(request).await.map_err(|err| -> anyhow::Error { match err {} })?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(b"application/x-ndjson".as_slice())
    );

    let mut events = EventReader::new(response.into_body().into_data_stream());
    assert!(matches!(events.expect().await?, StreamEvent::Connected { .. }));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_event_stream_accept_selects_sse() -> Result<()> {
    let harness = Harness::new().await?;
    let request = Request::builder()
        .uri(format!("/api/v1/workflows/{}/stream", harness.workflow_id))
        .header("x-user-email", BOB)
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())?;
    let response = harness.router.clone().oneshot(request).await.map_err(|err| -> anyhow::Error { match err {} })?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(b"text/event-stream".as_slice())
    );

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.context("first frame")??;
    let text = String::from_utf8(first.to_vec())?;
    assert!(text.contains("event: connected"), "{text}");
    Ok(())
}

/// RFC 3339 timestamps carry `+` and `:`, which must be escaped in a query
fn urlencode(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '+' => "%2B".to_string(),
            ':' => "%3A".to_string(),
            c => c.to_string(),
        })
        .collect()
}
