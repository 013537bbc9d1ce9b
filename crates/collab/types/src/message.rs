//! Workflow message thread types

use crate::{MessageId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Pointer into external object storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub object_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// A message posted to a workflow thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMessage {
    pub id: MessageId,
    pub workflow_id: WorkflowId,
    pub sender_email: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<MediaRef>,
}

impl WorkflowMessage {
    pub fn cursor(&self) -> MessageCursor {
        MessageCursor::new(self.created_at, self.id)
    }
}

/// A message before the store assigns its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub workflow_id: WorkflowId,
    pub sender_email: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub media_ref: Option<MediaRef>,
}

/// Position in a workflow's message thread.
///
/// `created_at` alone is not unique under concurrent writes, so the
/// ordering key is always the `(created_at, id)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageCursor {
    pub created_at: DateTime<Utc>,
    pub id: MessageId,
}

impl MessageCursor {
    pub fn new(created_at: DateTime<Utc>, id: MessageId) -> Self {
        Self { created_at, id }
    }

    /// True when `message` sorts strictly after this cursor
    pub fn precedes(&self, message: &WorkflowMessage) -> bool {
        message.cursor() > *self
    }
}

impl Ord for MessageCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.created_at, self.id).cmp(&(other.created_at, other.id))
    }
}

impl PartialOrd for MessageCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(id: i64, created_at: DateTime<Utc>) -> WorkflowMessage {
        WorkflowMessage {
            id: MessageId::new(id),
            workflow_id: WorkflowId::generate(),
            sender_email: UserId::new("alice@example.com"),
            body: "hello".into(),
            created_at,
            media_ref: None,
        }
    }

    #[test]
    fn test_cursor_breaks_timestamp_ties_by_id() {
        let t = Utc::now();
        let cursor = message(5, t).cursor();

        assert!(cursor.precedes(&message(6, t)));
        assert!(!cursor.precedes(&message(5, t)));
        assert!(!cursor.precedes(&message(4, t)));
    }

    #[test]
    fn test_cursor_orders_by_time_first() {
        let t = Utc::now();
        let cursor = message(10, t).cursor();

        assert!(cursor.precedes(&message(3, t + Duration::milliseconds(1))));
        assert!(!cursor.precedes(&message(11, t - Duration::milliseconds(1))));
    }
}
