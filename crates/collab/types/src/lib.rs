//! Collab Types - Core types for multi-tenant collaborative workflows
//!
//! A workflow is a bounded task with an initiator, a set of participants
//! drawn from one tenant's users, a message thread, and a lifecycle
//! (active, completed, terminated, with reactivation).
//!
//! ## Key Concepts
//!
//! - **Workflow**: the mutable lifecycle row, guarded by a version token
//! - **Participant**: a user explicitly attached to one workflow
//! - **WorkflowMessage**: thread entry ordered by `(created_at, id)`
//! - **RoleGrant**: tenant-scoped role held by a user
//! - **HistoryEvent**: immutable audit record
//! - **StreamEvent**: what update-stream subscribers receive

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod history;
pub mod ids;
pub mod message;
pub mod role;
pub mod workflow;

pub use events::StreamEvent;
pub use history::{HistoryEvent, HistoryEventType};
pub use ids::{MessageId, TenantId, UserId, WorkflowId};
pub use message::{MediaRef, MessageCursor, NewMessage, WorkflowMessage};
pub use role::{Role, RoleGrant};
pub use workflow::{
    Participant, ParticipantRole, Transition, TransitionRejection, Workflow, WorkflowStatus,
};

/// Errors raised when parsing wire or storage representations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid workflow id: {0}")]
    WorkflowId(String),

    #[error("invalid user id: {0:?}")]
    UserId(String),

    #[error("unknown workflow status: {0}")]
    Status(String),

    #[error("unknown role: {0}")]
    Role(String),

    #[error("unknown participant role: {0}")]
    ParticipantRole(String),

    #[error("unknown history event type: {0}")]
    HistoryEventType(String),
}
