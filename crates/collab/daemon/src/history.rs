//! Audit history writer
//!
//! Appends are awaited by the caller but never fail the caller: a write
//! error is logged and counted so it shows up at `/api/v1/status`.

use crate::storage::Storage;
use collab_types::{HistoryEvent, HistoryEventType, UserId, WorkflowId};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Best-effort writer for workflow audit events
#[derive(Clone)]
pub struct HistoryLogger {
    storage: Arc<dyn Storage>,
    failures: Arc<AtomicU64>,
}

impl HistoryLogger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an event; returns whether it was stored
    pub async fn append(
        &self,
        workflow_id: WorkflowId,
        event_type: HistoryEventType,
        performed_by: &UserId,
        payload: Value,
    ) -> bool {
        let event = HistoryEvent::new(workflow_id, event_type, performed_by.clone(), payload);

        match self.storage.append_history(event).await {
            Ok(()) => {
                tracing::debug!(
                    workflow_id = %workflow_id,
                    event_type = %event_type,
                    user = %performed_by,
                    "History event recorded"
                );
                true
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    workflow_id = %workflow_id,
                    event_type = %event_type,
                    error = %e,
                    "Failed to write history event"
                );
                false
            }
        }
    }

    /// Number of failed appends since start
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
