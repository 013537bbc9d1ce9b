//! Workflow update streams
//!
//! Each subscription owns one polling task and its `(created_at, id)`
//! cursor. The task feeds a bounded channel and stops as soon as the
//! receiving side is dropped or the daemon shuts down.

use crate::config::StreamConfig;
use crate::storage::Storage;
use chrono::Utc;
use collab_types::{MessageCursor, StreamEvent, TenantId, Workflow, WorkflowId};
use futures_util::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Tenant setting overriding the configured poll interval
pub const POLL_INTERVAL_SETTING: &str = "workflow_ssePollingIntervalMs";

/// Error code for failed store reads within a tick
pub const TRANSIENT_ERROR: &str = "TRANSIENT";

/// Error code for a workflow that disappeared mid-stream
pub const NOT_FOUND_ERROR: &str = "NOT_FOUND";

/// Spawns and configures update-stream subscriptions
#[derive(Clone)]
pub struct UpdateStream {
    storage: Arc<dyn Storage>,
    config: StreamConfig,
    shutdown: watch::Receiver<bool>,
}

impl UpdateStream {
    pub fn new(
        storage: Arc<dyn Storage>,
        config: StreamConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            storage,
            config,
            shutdown,
        }
    }

    /// Resolve the poll interval for one subscription: the tenant setting
    /// when present and valid, otherwise the daemon config, clamped to the
    /// configured minimum.
    pub async fn resolve_poll_interval(&self, tenant: &TenantId) -> Duration {
        let tenant_ms = match self
            .storage
            .get_tenant_setting(tenant, POLL_INTERVAL_SETTING)
            .await
        {
            Ok(Some(raw)) => match raw.trim().parse::<u64>() {
                Ok(ms) => Some(ms),
                Err(_) => {
                    tracing::warn!(
                        tenant = %tenant,
                        value = %raw,
                        "Ignoring non-numeric poll interval setting"
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "Failed to read poll interval setting");
                None
            }
        };

        let ms = tenant_ms.unwrap_or(self.config.poll_interval_ms);
        if ms < self.config.min_poll_interval_ms {
            tracing::warn!(
                tenant = %tenant,
                requested_ms = ms,
                min_ms = self.config.min_poll_interval_ms,
                "Poll interval below minimum, clamping"
            );
            return Duration::from_millis(self.config.min_poll_interval_ms);
        }
        Duration::from_millis(ms)
    }

    /// Start a subscription on `workflow`, optionally resuming after `cursor`
    pub async fn subscribe(
        &self,
        workflow: &Workflow,
        cursor: Option<MessageCursor>,
    ) -> Subscription {
        let interval = self.resolve_poll_interval(&workflow.tenant_id).await;
        self.subscribe_with_interval(workflow.id, cursor, interval)
    }

    /// Start a subscription with an explicit poll interval
    pub fn subscribe_with_interval(
        &self,
        workflow_id: WorkflowId,
        cursor: Option<MessageCursor>,
        interval: Duration,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let poller = Poller {
            storage: self.storage.clone(),
            workflow_id,
            cursor,
            max_batch: self.config.max_batch.max(1),
            tx,
        };

        tracing::debug!(
            workflow_id = %workflow_id,
            interval_ms = interval.as_millis() as u64,
            "Update stream subscribed"
        );
        tokio::spawn(poller.run(interval, self.shutdown.clone()));

        Subscription { rx }
    }
}

/// Receiving end of one update stream. Dropping it cancels the poller.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<StreamEvent>,
}

impl Subscription {
    /// Next event, or `None` once the poller has stopped
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Stop the poller; buffered events are discarded
    pub fn cancel(mut self) {
        self.rx.close();
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }
}

/// Receiver went away; the poll loop should stop
struct Closed;

struct Poller {
    storage: Arc<dyn Storage>,
    workflow_id: WorkflowId,
    cursor: Option<MessageCursor>,
    max_batch: usize,
    tx: mpsc::Sender<StreamEvent>,
}

impl Poller {
    async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let connected = StreamEvent::Connected {
            workflow_id: self.workflow_id,
            server_time: Utc::now(),
        };
        if self.tx.send(connected).await.is_err() {
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.tx.closed() => break,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if self.poll_once().await.is_err() {
                break;
            }
        }

        tracing::debug!(workflow_id = %self.workflow_id, "Update stream closed");
    }

    async fn send(&self, event: StreamEvent) -> Result<(), Closed> {
        self.tx.send(event).await.map_err(|_| Closed)
    }

    /// One tick: new messages, then the status heartbeat
    async fn poll_once(&mut self) -> Result<(), Closed> {
        if let Err(e) = self.poll_messages().await {
            match e {
                PollError::Closed => return Err(Closed),
                PollError::Storage(e) => {
                    tracing::warn!(
                        workflow_id = %self.workflow_id,
                        error = %e,
                        "Message poll failed"
                    );
                    self.send(StreamEvent::error(TRANSIENT_ERROR, e.to_string()))
                        .await?;
                }
            }
        }

        let event = match self.storage.get_workflow(&self.workflow_id).await {
            Ok(Some(workflow)) => StreamEvent::StatusUpdate {
                workflow_id: workflow.id,
                status: workflow.status,
                updated_at: workflow.updated_at,
            },
            Ok(None) => StreamEvent::error(
                NOT_FOUND_ERROR,
                format!("Workflow {} not found", self.workflow_id),
            ),
            Err(e) => {
                tracing::warn!(
                    workflow_id = %self.workflow_id,
                    error = %e,
                    "Status poll failed"
                );
                StreamEvent::error(TRANSIENT_ERROR, e.to_string())
            }
        };
        self.send(event).await
    }

    async fn poll_messages(&mut self) -> Result<(), PollError> {
        let latest = self
            .storage
            .latest_message_cursor(&self.workflow_id)
            .await?;

        let has_new = match (latest, self.cursor) {
            (None, _) => false,
            (Some(latest), Some(cursor)) => latest > cursor,
            (Some(_), None) => true,
        };
        if !has_new {
            return Ok(());
        }

        loop {
            let batch = self
                .storage
                .list_messages_after(&self.workflow_id, self.cursor, self.max_batch)
                .await?;
            let full = batch.len() == self.max_batch;

            let mut last = None;
            for message in batch {
                if self.cursor.is_some_and(|c| !c.precedes(&message)) {
                    continue;
                }
                last = Some(message.cursor());
                self.send(StreamEvent::Message { message })
                    .await
                    .map_err(|_| PollError::Closed)?;
            }

            match last {
                Some(cursor) => self.cursor = Some(cursor),
                None => break,
            }
            if !full {
                break;
            }
        }

        Ok(())
    }
}

enum PollError {
    Closed,
    Storage(crate::error::StorageError),
}

impl From<crate::error::StorageError> for PollError {
    fn from(e: crate::error::StorageError) -> Self {
        PollError::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        InMemoryStorage, MessageStorage, TenantSettingsStorage, WorkflowStorage,
    };
    use collab_types::{NewMessage, Participant, ParticipantRole, UserId};

    fn config() -> StreamConfig {
        StreamConfig {
            poll_interval_ms: 15_000,
            min_poll_interval_ms: 250,
            max_batch: 2,
            channel_capacity: 16,
        }
    }

    async fn setup() -> (Arc<InMemoryStorage>, UpdateStream, Workflow, watch::Sender<bool>) {
        let storage = Arc::new(InMemoryStorage::new());
        let alice = UserId::new("alice@example.com");
        let wf = Workflow::new(TenantId::new("t1"), "Launch", alice.clone());
        storage
            .create_workflow(
                wf.clone(),
                vec![Participant::new(wf.id, alice, ParticipantRole::Initiator)],
            )
            .await
            .unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let streams = UpdateStream::new(storage.clone(), config(), shutdown_rx);
        (storage, streams, wf, shutdown_tx)
    }

    async fn post(storage: &InMemoryStorage, wf: &Workflow, body: &str) {
        storage
            .insert_message(NewMessage {
                workflow_id: wf.id,
                sender_email: UserId::new("alice@example.com"),
                body: body.to_string(),
                created_at: Utc::now(),
                media_ref: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_interval_resolution() {
        let (storage, streams, wf, _shutdown) = setup().await;
        assert_eq!(
            streams.resolve_poll_interval(&wf.tenant_id).await,
            Duration::from_millis(15_000)
        );

        storage
            .put_tenant_setting(&wf.tenant_id, POLL_INTERVAL_SETTING, "2000")
            .await
            .unwrap();
        assert_eq!(
            streams.resolve_poll_interval(&wf.tenant_id).await,
            Duration::from_millis(2000)
        );

        storage
            .put_tenant_setting(&wf.tenant_id, POLL_INTERVAL_SETTING, "10")
            .await
            .unwrap();
        assert_eq!(
            streams.resolve_poll_interval(&wf.tenant_id).await,
            Duration::from_millis(250)
        );

        storage
            .put_tenant_setting(&wf.tenant_id, POLL_INTERVAL_SETTING, "soon")
            .await
            .unwrap();
        assert_eq!(
            streams.resolve_poll_interval(&wf.tenant_id).await,
            Duration::from_millis(15_000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_drains_backlog_in_batches() {
        let (storage, streams, wf, _shutdown) = setup().await;
        for body in ["one", "two", "three"] {
            post(&storage, &wf, body).await;
        }

        let mut sub = streams.subscribe_with_interval(wf.id, None, Duration::from_secs(1));
        assert!(matches!(sub.recv().await, Some(StreamEvent::Connected { .. })));

        let mut bodies = Vec::new();
        for _ in 0..3 {
            match sub.recv().await {
                Some(StreamEvent::Message { message }) => bodies.push(message.body),
                other => panic!("expected message, got {:?}", other),
            }
        }
        assert_eq!(bodies, vec!["one", "two", "three"]);
        assert!(matches!(sub.recv().await, Some(StreamEvent::StatusUpdate { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_reports_error_and_keeps_cursor() {
        let (storage, streams, wf, _shutdown) = setup().await;
        post(&storage, &wf, "first").await;

        let mut sub = streams.subscribe_with_interval(wf.id, None, Duration::from_secs(1));
        assert!(matches!(sub.recv().await, Some(StreamEvent::Connected { .. })));
        assert!(matches!(sub.recv().await, Some(StreamEvent::Message { .. })));
        assert!(matches!(sub.recv().await, Some(StreamEvent::StatusUpdate { .. })));

        post(&storage, &wf, "second").await;
        storage.fail_next_reads(1);

        match sub.recv().await {
            Some(StreamEvent::Error { code, .. }) => assert_eq!(code, TRANSIENT_ERROR),
            other => panic!("expected error, got {:?}", other),
        }
        assert!(matches!(sub.recv().await, Some(StreamEvent::StatusUpdate { .. })));

        match sub.recv().await {
            Some(StreamEvent::Message { message }) => assert_eq!(message.body, "second"),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_subscription() {
        let (_storage, streams, wf, shutdown) = setup().await;
        let mut sub = streams.subscribe_with_interval(wf.id, None, Duration::from_secs(1));
        assert!(matches!(sub.recv().await, Some(StreamEvent::Connected { .. })));
        assert!(matches!(sub.recv().await, Some(StreamEvent::StatusUpdate { .. })));

        shutdown.send(true).unwrap();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_cursor_skips_seen_messages() {
        let (storage, streams, wf, _shutdown) = setup().await;
        post(&storage, &wf, "seen").await;
        let cursor = storage.latest_message_cursor(&wf.id).await.unwrap();
        post(&storage, &wf, "unseen").await;

        let mut sub = streams.subscribe_with_interval(wf.id, cursor, Duration::from_secs(1));
        assert!(matches!(sub.recv().await, Some(StreamEvent::Connected { .. })));
        match sub.recv().await {
            Some(StreamEvent::Message { message }) => assert_eq!(message.body, "unseen"),
            other => panic!("expected message, got {:?}", other),
        }
    }
}
