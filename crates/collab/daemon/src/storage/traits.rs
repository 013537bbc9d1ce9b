//! Storage trait definitions

use super::filter::WorkflowFilter;
use crate::error::StorageError;
use async_trait::async_trait;
use collab_types::{
    HistoryEvent, MessageCursor, NewMessage, Participant, RoleGrant, TenantId, UserId, Workflow,
    WorkflowId, WorkflowMessage,
};
use serde::Serialize;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Combined storage trait
#[async_trait]
pub trait Storage:
    WorkflowStorage + MessageStorage + HistoryStorage + RoleStorage + TenantSettingsStorage + Send + Sync
{
}

/// Aggregate workflow counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub terminated: usize,
}

/// Storage for workflows and their participants
#[async_trait]
pub trait WorkflowStorage: Send + Sync {
    /// Insert a workflow and its participant rows in one unit.
    ///
    /// The initiator must be among `participants`.
    async fn create_workflow(
        &self,
        workflow: Workflow,
        participants: Vec<Participant>,
    ) -> StorageResult<()>;

    /// Get a workflow by ID
    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<Workflow>>;

    /// List workflows matching a typed filter
    async fn list_workflows(&self, filter: &WorkflowFilter) -> StorageResult<Vec<Workflow>>;

    /// Replace the workflow row if its stored version still equals
    /// `expected_version`; fails with `VersionConflict` otherwise.
    async fn update_workflow(
        &self,
        workflow: Workflow,
        expected_version: i64,
    ) -> StorageResult<Workflow>;

    /// List participants of a workflow, ordered by join time
    async fn list_participants(&self, id: &WorkflowId) -> StorageResult<Vec<Participant>>;

    /// Add a participant; returns the stored row and whether it was newly inserted
    async fn add_participant(&self, participant: Participant)
        -> StorageResult<(Participant, bool)>;

    /// Count workflows by status
    async fn workflow_stats(&self) -> StorageResult<WorkflowStats>;
}

/// Storage for workflow message threads
#[async_trait]
pub trait MessageStorage: Send + Sync {
    /// Append a message; rejected with `WorkflowNotActive` unless the
    /// workflow is active at insert time.
    ///
    /// The stored `created_at` never precedes the thread's newest message,
    /// so appends become visible in `(created_at, id)` order.
    async fn insert_message(&self, message: NewMessage) -> StorageResult<WorkflowMessage>;

    /// Position of the newest message in a thread
    async fn latest_message_cursor(
        &self,
        workflow_id: &WorkflowId,
    ) -> StorageResult<Option<MessageCursor>>;

    /// Messages strictly after `after` in ascending `(created_at, id)` order
    async fn list_messages_after(
        &self,
        workflow_id: &WorkflowId,
        after: Option<MessageCursor>,
        limit: usize,
    ) -> StorageResult<Vec<WorkflowMessage>>;

    /// The newest `limit` messages, returned in ascending order
    async fn list_recent_messages(
        &self,
        workflow_id: &WorkflowId,
        limit: usize,
    ) -> StorageResult<Vec<WorkflowMessage>>;
}

/// Append-only storage for audit history
#[async_trait]
pub trait HistoryStorage: Send + Sync {
    /// Store a history event
    async fn append_history(&self, event: HistoryEvent) -> StorageResult<()>;

    /// History of one workflow, oldest first
    async fn list_history(&self, workflow_id: &WorkflowId) -> StorageResult<Vec<HistoryEvent>>;
}

/// Storage for system admins and tenant role grants
#[async_trait]
pub trait RoleStorage: Send + Sync {
    /// Authoritative system-admin lookup, independent of tenant
    async fn is_system_admin(&self, user: &UserId) -> StorageResult<bool>;

    /// Grants held by `user`, optionally restricted to one tenant
    async fn list_role_grants(
        &self,
        user: &UserId,
        tenant: Option<&TenantId>,
    ) -> StorageResult<Vec<RoleGrant>>;

    /// Insert a grant; returns false if the `(tenant, user, role)` triple exists
    async fn grant_role(&self, grant: RoleGrant) -> StorageResult<bool>;

    /// Register a system admin
    async fn add_system_admin(&self, user: &UserId) -> StorageResult<()>;
}

/// Per-tenant key/value settings
#[async_trait]
pub trait TenantSettingsStorage: Send + Sync {
    async fn get_tenant_setting(&self, tenant: &TenantId, key: &str)
        -> StorageResult<Option<String>>;

    async fn put_tenant_setting(&self, tenant: &TenantId, key: &str, value: &str)
        -> StorageResult<()>;
}
