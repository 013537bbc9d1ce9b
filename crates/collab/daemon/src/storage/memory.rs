//! In-memory storage implementation
//!
//! Lock order is always `workflows` before `messages`. Message inserts
//! hold the workflows read lock while appending, so a concurrent status
//! change cannot slip between the active check and the write.

use super::filter::WorkflowFilter;
use super::traits::*;
use crate::error::StorageError;
use async_trait::async_trait;
use collab_types::{
    HistoryEvent, MessageCursor, MessageId, NewMessage, Participant, Role, RoleGrant, TenantId,
    UserId, Workflow, WorkflowId, WorkflowMessage, WorkflowStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct WorkflowRecord {
    workflow: Workflow,
    participants: Vec<Participant>,
}

/// In-memory storage for development and testing
#[derive(Debug)]
pub struct InMemoryStorage {
    workflows: Arc<RwLock<HashMap<WorkflowId, WorkflowRecord>>>,
    messages: Arc<RwLock<HashMap<WorkflowId, Vec<WorkflowMessage>>>>,
    history: Arc<RwLock<HashMap<WorkflowId, Vec<HistoryEvent>>>>,
    grants: Arc<RwLock<HashMap<(TenantId, UserId, Role), RoleGrant>>>,
    admins: Arc<RwLock<HashSet<UserId>>>,
    settings: Arc<RwLock<HashMap<(TenantId, String), String>>>,
    message_sequence: Arc<AtomicI64>,
    read_failures: Arc<AtomicUsize>,
    history_failures: Arc<AtomicUsize>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self {
            workflows: Arc::new(RwLock::new(HashMap::new())),
            messages: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(HashMap::new())),
            grants: Arc::new(RwLock::new(HashMap::new())),
            admins: Arc::new(RwLock::new(HashSet::new())),
            settings: Arc::new(RwLock::new(HashMap::new())),
            message_sequence: Arc::new(AtomicI64::new(0)),
            read_failures: Arc::new(AtomicUsize::new(0)),
            history_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` workflow or message reads fail with a
    /// connection error. Used to exercise poll-failure handling.
    pub fn fail_next_reads(&self, count: usize) {
        self.read_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` history appends fail
    pub fn fail_next_history_writes(&self, count: usize) {
        self.history_failures.store(count, Ordering::SeqCst);
    }

    fn check_injected_failure(&self) -> StorageResult<()> {
        Self::trip(&self.read_failures, "injected read failure")
    }

    fn trip(counter: &AtomicUsize, message: &str) -> StorageResult<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(StorageError::Connection(message.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowStorage for InMemoryStorage {
    async fn create_workflow(
        &self,
        workflow: Workflow,
        participants: Vec<Participant>,
    ) -> StorageResult<()> {
        if !participants
            .iter()
            .any(|p| p.participant_email == workflow.initiator_email)
        {
            return Err(StorageError::InvalidData(
                "initiator must be a participant".to_string(),
            ));
        }

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow.id) {
            return Err(StorageError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }

        let mut unique: Vec<Participant> = Vec::with_capacity(participants.len());
        for participant in participants {
            if !unique
                .iter()
                .any(|p| p.participant_email == participant.participant_email)
            {
                unique.push(participant);
            }
        }

        workflows.insert(
            workflow.id,
            WorkflowRecord {
                workflow,
                participants: unique,
            },
        );
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<Workflow>> {
        self.check_injected_failure()?;
        let workflows = self.workflows.read().await;
        Ok(workflows.get(id).map(|r| r.workflow.clone()))
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> StorageResult<Vec<Workflow>> {
        let workflows = self.workflows.read().await;
        let mut matched: Vec<Workflow> = workflows
            .values()
            .filter(|r| filter.matches(&r.workflow, &r.participants))
            .map(|r| r.workflow.clone())
            .collect();

        matched.sort_by(|a, b| filter.compare(a, b));

        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn update_workflow(
        &self,
        workflow: Workflow,
        expected_version: i64,
    ) -> StorageResult<Workflow> {
        let mut workflows = self.workflows.write().await;
        let record = workflows
            .get_mut(&workflow.id)
            .ok_or_else(|| StorageError::NotFound(workflow.id.to_string()))?;

        if record.workflow.version != expected_version {
            return Err(StorageError::VersionConflict {
                id: workflow.id,
                expected: expected_version,
            });
        }

        record.workflow = workflow.clone();
        Ok(workflow)
    }

    async fn list_participants(&self, id: &WorkflowId) -> StorageResult<Vec<Participant>> {
        let workflows = self.workflows.read().await;
        let mut participants = workflows
            .get(id)
            .map(|r| r.participants.clone())
            .unwrap_or_default();
        participants.sort_by_key(|p| p.joined_at);
        Ok(participants)
    }

    async fn add_participant(
        &self,
        participant: Participant,
    ) -> StorageResult<(Participant, bool)> {
        let mut workflows = self.workflows.write().await;
        let record = workflows
            .get_mut(&participant.workflow_id)
            .ok_or_else(|| StorageError::NotFound(participant.workflow_id.to_string()))?;

        if let Some(existing) = record
            .participants
            .iter()
            .find(|p| p.participant_email == participant.participant_email)
        {
            return Ok((existing.clone(), false));
        }

        record.participants.push(participant.clone());
        Ok((participant, true))
    }

    async fn workflow_stats(&self) -> StorageResult<WorkflowStats> {
        let workflows = self.workflows.read().await;
        let mut stats = WorkflowStats::default();
        for record in workflows.values() {
            stats.total += 1;
            match record.workflow.status {
                WorkflowStatus::Active => stats.active += 1,
                WorkflowStatus::Completed => stats.completed += 1,
                WorkflowStatus::Terminated => stats.terminated += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl MessageStorage for InMemoryStorage {
    async fn insert_message(&self, message: NewMessage) -> StorageResult<WorkflowMessage> {
        let workflows = self.workflows.read().await;
        let record = workflows
            .get(&message.workflow_id)
            .ok_or_else(|| StorageError::NotFound(message.workflow_id.to_string()))?;

        if !record.workflow.status.is_active() {
            return Err(StorageError::WorkflowNotActive {
                id: message.workflow_id,
                status: record.workflow.status,
            });
        }

        let mut messages = self.messages.write().await;
        let thread = messages.entry(message.workflow_id).or_default();

        // Keep each thread sorted by (created_at, id) on append
        let created_at = match thread.last() {
            Some(last) if last.created_at > message.created_at => last.created_at,
            _ => message.created_at,
        };
        let id = MessageId::new(self.message_sequence.fetch_add(1, Ordering::SeqCst) + 1);

        let stored = WorkflowMessage {
            id,
            workflow_id: message.workflow_id,
            sender_email: message.sender_email,
            body: message.body,
            created_at,
            media_ref: message.media_ref,
        };
        thread.push(stored.clone());
        Ok(stored)
    }

    async fn latest_message_cursor(
        &self,
        workflow_id: &WorkflowId,
    ) -> StorageResult<Option<MessageCursor>> {
        self.check_injected_failure()?;
        let messages = self.messages.read().await;
        Ok(messages
            .get(workflow_id)
            .and_then(|thread| thread.last())
            .map(WorkflowMessage::cursor))
    }

    async fn list_messages_after(
        &self,
        workflow_id: &WorkflowId,
        after: Option<MessageCursor>,
        limit: usize,
    ) -> StorageResult<Vec<WorkflowMessage>> {
        self.check_injected_failure()?;
        let messages = self.messages.read().await;
        let Some(thread) = messages.get(workflow_id) else {
            return Ok(Vec::new());
        };

        Ok(thread
            .iter()
            .filter(|m| after.map_or(true, |cursor| cursor.precedes(m)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_recent_messages(
        &self,
        workflow_id: &WorkflowId,
        limit: usize,
    ) -> StorageResult<Vec<WorkflowMessage>> {
        let messages = self.messages.read().await;
        let Some(thread) = messages.get(workflow_id) else {
            return Ok(Vec::new());
        };
        let start = thread.len().saturating_sub(limit);
        Ok(thread[start..].to_vec())
    }
}

#[async_trait]
impl HistoryStorage for InMemoryStorage {
    async fn append_history(&self, event: HistoryEvent) -> StorageResult<()> {
        Self::trip(&self.history_failures, "injected history write failure")?;
        let mut history = self.history.write().await;
        history.entry(event.workflow_id).or_default().push(event);
        Ok(())
    }

    async fn list_history(&self, workflow_id: &WorkflowId) -> StorageResult<Vec<HistoryEvent>> {
        let history = self.history.read().await;
        Ok(history.get(workflow_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RoleStorage for InMemoryStorage {
    async fn is_system_admin(&self, user: &UserId) -> StorageResult<bool> {
        let admins = self.admins.read().await;
        Ok(admins.contains(user))
    }

    async fn list_role_grants(
        &self,
        user: &UserId,
        tenant: Option<&TenantId>,
    ) -> StorageResult<Vec<RoleGrant>> {
        let grants = self.grants.read().await;
        Ok(grants
            .values()
            .filter(|g| &g.user_id == user)
            .filter(|g| tenant.map_or(true, |t| &g.tenant_id == t))
            .cloned()
            .collect())
    }

    async fn grant_role(&self, grant: RoleGrant) -> StorageResult<bool> {
        let mut grants = self.grants.write().await;
        let key = (grant.tenant_id.clone(), grant.user_id.clone(), grant.role);
        if grants.contains_key(&key) {
            return Ok(false);
        }
        grants.insert(key, grant);
        Ok(true)
    }

    async fn add_system_admin(&self, user: &UserId) -> StorageResult<()> {
        let mut admins = self.admins.write().await;
        admins.insert(user.clone());
        Ok(())
    }
}

#[async_trait]
impl TenantSettingsStorage for InMemoryStorage {
    async fn get_tenant_setting(
        &self,
        tenant: &TenantId,
        key: &str,
    ) -> StorageResult<Option<String>> {
        let settings = self.settings.read().await;
        Ok(settings.get(&(tenant.clone(), key.to_string())).cloned())
    }

    async fn put_tenant_setting(
        &self,
        tenant: &TenantId,
        key: &str,
        value: &str,
    ) -> StorageResult<()> {
        let mut settings = self.settings.write().await;
        settings.insert((tenant.clone(), key.to_string()), value.to_string());
        Ok(())
    }
}

impl Storage for InMemoryStorage {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessibleTenants;
    use crate::storage::WorkflowSort;
    use chrono::Utc;
    use collab_types::{ParticipantRole, Transition};

    fn alice() -> UserId {
        UserId::new("alice@example.com")
    }

    async fn seeded(storage: &InMemoryStorage, title: &str) -> Workflow {
        let wf = Workflow::new(TenantId::new("t1"), title, alice());
        let initiator = Participant::new(wf.id, alice(), ParticipantRole::Initiator);
        storage
            .create_workflow(wf.clone(), vec![initiator])
            .await
            .unwrap();
        wf
    }

    fn new_message(workflow_id: WorkflowId, body: &str) -> NewMessage {
        NewMessage {
            workflow_id,
            sender_email: alice(),
            body: body.to_string(),
            created_at: Utc::now(),
            media_ref: None,
        }
    }

    #[tokio::test]
    async fn test_workflow_crud() {
        let storage = InMemoryStorage::new();
        let wf = seeded(&storage, "Contract review").await;

        let fetched = storage.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(fetched, wf);

        let participants = storage.list_participants(&wf.id).await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].role, ParticipantRole::Initiator);

        let stats = storage.workflow_stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
    }

    #[tokio::test]
    async fn test_create_requires_initiator_participant() {
        let storage = InMemoryStorage::new();
        let wf = Workflow::new(TenantId::new("t1"), "Orphan", alice());
        let err = storage.create_workflow(wf, Vec::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let storage = InMemoryStorage::new();
        let wf = seeded(&storage, "Contract review").await;

        let first = wf
            .apply_transition(Transition::Complete, &alice(), Utc::now())
            .unwrap();
        let second = wf
            .apply_transition(Transition::Terminate, &alice(), Utc::now())
            .unwrap();

        storage.update_workflow(first, wf.version).await.unwrap();
        let err = storage.update_workflow(second, wf.version).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { expected, .. } if expected == wf.version));

        let stored = storage.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_messages_rejected_after_completion() {
        let storage = InMemoryStorage::new();
        let wf = seeded(&storage, "Contract review").await;
        storage.insert_message(new_message(wf.id, "first")).await.unwrap();

        let completed = wf
            .apply_transition(Transition::Complete, &alice(), Utc::now())
            .unwrap();
        storage.update_workflow(completed, wf.version).await.unwrap();

        let err = storage
            .insert_message(new_message(wf.id, "late"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::WorkflowNotActive {
                status: WorkflowStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cursor_paging_with_equal_timestamps() {
        let storage = InMemoryStorage::new();
        let wf = seeded(&storage, "Contract review").await;
        let t = Utc::now();

        let mut stored = Vec::new();
        for body in ["a", "b", "c"] {
            let mut msg = new_message(wf.id, body);
            msg.created_at = t;
            stored.push(storage.insert_message(msg).await.unwrap());
        }

        let page = storage
            .list_messages_after(&wf.id, Some(stored[0].cursor()), 10)
            .await
            .unwrap();
        let bodies: Vec<_> = page.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["b", "c"]);

        let latest = storage.latest_message_cursor(&wf.id).await.unwrap();
        assert_eq!(latest, Some(stored[2].cursor()));
    }

    #[tokio::test]
    async fn test_recent_messages_are_ascending_tail() {
        let storage = InMemoryStorage::new();
        let wf = seeded(&storage, "Contract review").await;
        for i in 0..5 {
            storage
                .insert_message(new_message(wf.id, &format!("m{}", i)))
                .await
                .unwrap();
        }

        let recent = storage.list_recent_messages(&wf.id, 2).await.unwrap();
        let bodies: Vec<_> = recent.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let storage = InMemoryStorage::new();
        let wf = seeded(&storage, "Contract review").await;

        storage.fail_next_reads(1);
        assert!(storage.get_workflow(&wf.id).await.is_err());
        assert!(storage.get_workflow(&wf.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_grants_are_unique() {
        let storage = InMemoryStorage::new();
        let grant = RoleGrant::new(TenantId::new("t1"), alice(), Role::Member);

        assert!(storage.grant_role(grant.clone()).await.unwrap());
        assert!(!storage.grant_role(grant).await.unwrap());
        assert_eq!(storage.list_role_grants(&alice(), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_sorts_and_pages() {
        let storage = InMemoryStorage::new();
        for title in ["Charlie", "Alpha", "Bravo"] {
            seeded(&storage, title).await;
        }

        let mut filter = WorkflowFilter::visible_to(AccessibleTenants::All, None);
        filter.sort = WorkflowSort::Title;
        filter.order = crate::storage::SortOrder::Asc;
        filter.limit = 2;
        filter.offset = 1;

        let page = storage.list_workflows(&filter).await.unwrap();
        let titles: Vec<_> = page.iter().map(|w| w.title.as_str()).collect();
        assert_eq!(titles, vec!["Bravo", "Charlie"]);
    }

    #[tokio::test]
    async fn test_add_participant_is_idempotent() {
        let storage = InMemoryStorage::new();
        let wf = seeded(&storage, "Contract review").await;
        let bob = UserId::new("bob@example.com");

        let (_, inserted) = storage
            .add_participant(Participant::new(wf.id, bob.clone(), ParticipantRole::Participant))
            .await
            .unwrap();
        assert!(inserted);

        let (_, inserted) = storage
            .add_participant(Participant::new(wf.id, bob, ParticipantRole::Participant))
            .await
            .unwrap();
        assert!(!inserted);
        assert_eq!(storage.list_participants(&wf.id).await.unwrap().len(), 2);
    }
}
