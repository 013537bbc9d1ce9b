//! Workflow lifecycle types
//!
//! A workflow is a bounded collaborative task owned by exactly one tenant.
//! Its status only changes through the transitions defined here.

use crate::{ParseError, TenantId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persisted workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Completed,
    Terminated,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 3] = [
        WorkflowStatus::Active,
        WorkflowStatus::Completed,
        WorkflowStatus::Terminated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Terminated => "terminated",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowStatus::Active)
    }

    /// Check whether `self -> target` is an edge of the transition graph.
    ///
    /// The graph is `active -> completed`, `active -> terminated`,
    /// `completed -> active` and `terminated -> active`.
    pub fn can_transition_to(&self, target: WorkflowStatus) -> Result<(), TransitionRejection> {
        use WorkflowStatus::*;

        if *self == target {
            return Err(TransitionRejection::AlreadyInState(target));
        }

        match (self, target) {
            (Active, Completed) | (Active, Terminated) => Ok(()),
            (Completed, Active) | (Terminated, Active) => Ok(()),
            (from, to) => Err(TransitionRejection::NotAllowed { from: *from, to }),
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WorkflowStatus::Active),
            "completed" => Ok(WorkflowStatus::Completed),
            "terminated" => Ok(WorkflowStatus::Terminated),
            other => Err(ParseError::Status(other.to_string())),
        }
    }
}

/// Lifecycle actions a caller can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Complete,
    Terminate,
    Reactivate,
}

impl Transition {
    pub const ALL: [Transition; 3] = [
        Transition::Complete,
        Transition::Terminate,
        Transition::Reactivate,
    ];

    /// Status the workflow ends up in after this transition
    pub fn target(&self) -> WorkflowStatus {
        match self {
            Transition::Complete => WorkflowStatus::Completed,
            Transition::Terminate => WorkflowStatus::Terminated,
            Transition::Reactivate => WorkflowStatus::Active,
        }
    }

    /// The transition that leads into `status`
    pub fn into_status(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Completed => Transition::Complete,
            WorkflowStatus::Terminated => Transition::Terminate,
            WorkflowStatus::Active => Transition::Reactivate,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transition::Complete => "complete",
            Transition::Terminate => "terminate",
            Transition::Reactivate => "reactivate",
        };
        f.write_str(s)
    }
}

/// Why a requested status change was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionRejection {
    #[error("workflow is already {0}")]
    AlreadyInState(WorkflowStatus),

    #[error("cannot move workflow from {from} to {to}")]
    NotAllowed {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
}

/// A collaborative workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier
    pub id: WorkflowId,

    /// Owning tenant, immutable after creation
    pub tenant_id: TenantId,

    pub title: String,

    pub status: WorkflowStatus,

    /// User who created the workflow (always a participant)
    pub initiator_email: UserId,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Set together with `completed_by`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<UserId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency token, bumped on every write
    pub version: i64,
}

impl Workflow {
    /// Create a new active workflow
    pub fn new(tenant_id: TenantId, title: impl Into<String>, initiator: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::generate(),
            tenant_id,
            title: title.into(),
            status: WorkflowStatus::Active,
            initiator_email: initiator,
            created_at: now,
            updated_at: now,
            completed_at: None,
            completed_by: None,
            terminated_at: None,
            version: 1,
        }
    }

    /// Produce the next revision of this workflow after `transition`.
    ///
    /// Side effects (timestamps, completion attribution) are written here so
    /// that every store applies them identically.
    pub fn apply_transition(
        &self,
        transition: Transition,
        actor: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Workflow, TransitionRejection> {
        let target = transition.target();
        self.status.can_transition_to(target)?;

        let mut next = self.clone();
        next.status = target;
        next.updated_at = now;
        next.version = self.version + 1;

        match transition {
            Transition::Complete => {
                next.completed_at = Some(now);
                next.completed_by = Some(actor.clone());
            }
            Transition::Terminate => {
                next.terminated_at = Some(now);
            }
            Transition::Reactivate => {
                next.completed_at = None;
                next.completed_by = None;
                next.terminated_at = None;
            }
        }

        Ok(next)
    }

    /// Produce the next revision with a new title
    pub fn with_title(&self, title: impl Into<String>, now: DateTime<Utc>) -> Workflow {
        let mut next = self.clone();
        next.title = title.into();
        next.updated_at = now;
        next.version = self.version + 1;
        next
    }

    /// Check the record-level invariants
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.completed_at.is_some() != self.completed_by.is_some() {
            return Err("completed_at and completed_by must be set together".to_string());
        }
        if self.status == WorkflowStatus::Completed && self.completed_at.is_none() {
            return Err("completed workflow has no completion attribution".to_string());
        }
        if self.status != WorkflowStatus::Completed && self.completed_at.is_some() {
            return Err(format!("{} workflow carries completion attribution", self.status));
        }
        Ok(())
    }
}

/// How a participant joined the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Initiator,
    Participant,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Initiator => "initiator",
            ParticipantRole::Participant => "participant",
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiator" => Ok(ParticipantRole::Initiator),
            "participant" => Ok(ParticipantRole::Participant),
            other => Err(ParseError::ParticipantRole(other.to_string())),
        }
    }
}

/// A user explicitly attached to a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub workflow_id: WorkflowId,
    pub participant_email: UserId,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(workflow_id: WorkflowId, email: UserId, role: ParticipantRole) -> Self {
        Self {
            workflow_id,
            participant_email: email,
            role,
            joined_at: Utc::now(),
        }
    }
}
