//! Events delivered to update-stream subscribers

use crate::{WorkflowId, WorkflowMessage, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One event on a workflow update stream.
///
/// Consumers must treat `Error` as "skip this tick"; only a closed
/// connection ends a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Sent once, immediately after subscribing
    Connected {
        workflow_id: WorkflowId,
        server_time: DateTime<Utc>,
    },

    /// A message newer than the subscription cursor
    Message { message: WorkflowMessage },

    /// Current workflow status, sent on every tick as a heartbeat
    StatusUpdate {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        updated_at: DateTime<Utc>,
    },

    /// A poll failed; the subscription keeps running
    Error { code: String, message: String },
}

impl StreamEvent {
    /// Event name used for the SSE `event:` field
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Message { .. } => "message",
            StreamEvent::StatusUpdate { .. } => "status_update",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_is_tagged() {
        let event = StreamEvent::StatusUpdate {
            workflow_id: WorkflowId::generate(),
            status: WorkflowStatus::Completed,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_update");
        assert_eq!(json["status"], "completed");
        assert_eq!(event.kind(), "status_update");
    }
}
