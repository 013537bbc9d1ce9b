//! Append-only audit trail records
//!
//! History events outlive the mutable workflow row: they are never updated
//! or deleted by normal operation.

use crate::{UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ParseError;

/// Kinds of audited events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventType {
    WorkflowCreated,
    /// Generic change record, fired for title edits and alongside status changes
    WorkflowUpdated,
    WorkflowCompleted,
    WorkflowTerminated,
    WorkflowReactivated,
    ParticipantAdded,
    AccessDenied,
}

impl HistoryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryEventType::WorkflowCreated => "workflow_created",
            HistoryEventType::WorkflowUpdated => "workflow_updated",
            HistoryEventType::WorkflowCompleted => "workflow_completed",
            HistoryEventType::WorkflowTerminated => "workflow_terminated",
            HistoryEventType::WorkflowReactivated => "workflow_reactivated",
            HistoryEventType::ParticipantAdded => "participant_added",
            HistoryEventType::AccessDenied => "access_denied",
        }
    }
}

impl fmt::Display for HistoryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryEventType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow_created" => Ok(HistoryEventType::WorkflowCreated),
            "workflow_updated" => Ok(HistoryEventType::WorkflowUpdated),
            "workflow_completed" => Ok(HistoryEventType::WorkflowCompleted),
            "workflow_terminated" => Ok(HistoryEventType::WorkflowTerminated),
            "workflow_reactivated" => Ok(HistoryEventType::WorkflowReactivated),
            "participant_added" => Ok(HistoryEventType::ParticipantAdded),
            "access_denied" => Ok(HistoryEventType::AccessDenied),
            other => Err(ParseError::HistoryEventType(other.to_string())),
        }
    }
}

/// Immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub id: Uuid,
    pub workflow_id: WorkflowId,
    pub event_type: HistoryEventType,
    pub performed_by: UserId,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl HistoryEvent {
    pub fn new(
        workflow_id: WorkflowId,
        event_type: HistoryEventType,
        performed_by: UserId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            event_type,
            performed_by,
            timestamp: Utc::now(),
            payload,
        }
    }
}
