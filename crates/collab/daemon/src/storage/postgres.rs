//! PostgreSQL storage implementation

use super::filter::WorkflowFilter;
use super::traits::*;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collab_types::{
    HistoryEvent, HistoryEventType, MediaRef, MessageCursor, MessageId, NewMessage, Participant,
    ParticipantRole, Role, RoleGrant, TenantId, UserId, Workflow, WorkflowId, WorkflowMessage,
    WorkflowStatus,
};
use serde_json::Value;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Postgres, Row,
};
use std::str::FromStr;
use std::time::Duration;

const WORKFLOW_COLUMNS: &str = "id, tenant_id, title, status, initiator_email, created_at, \
     updated_at, completed_at, completed_by, terminated_at, version";

const MESSAGE_COLUMNS: &str =
    "id, workflow_id, sender_email, body, created_at, media_object_key, media_content_type";

/// Message insert guarded by the workflow row lock.
///
/// `FOR UPDATE` serializes inserts on one workflow with each other and with
/// status changes, and the timestamp is taken after the lock is held and
/// never falls behind the thread's newest message. Commit order therefore
/// matches `(created_at, id)` order, so a subscriber's cursor cannot pass a
/// message that has yet to commit.
fn insert_message_sql() -> String {
    format!(
        r#"
        INSERT INTO workflow_messages
            (workflow_id, sender_email, body, created_at, media_object_key, media_content_type)
        SELECT w.id, $2, $3,
            GREATEST(
                clock_timestamp(),
                (SELECT MAX(created_at) FROM workflow_messages WHERE workflow_id = $1)
            ),
            $4, $5
        FROM (SELECT id FROM workflows WHERE id = $1 AND status = 'active' FOR UPDATE) w
        RETURNING {}
        "#,
        MESSAGE_COLUMNS
    )
}

/// PostgreSQL-backed storage
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect to PostgreSQL and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let storage = Self { pool };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                initiator_email TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                completed_by TEXT,
                terminated_at TIMESTAMPTZ,
                version BIGINT NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS workflows_tenant_status ON workflows(tenant_id, status);"#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_participants (
                workflow_id UUID NOT NULL REFERENCES workflows(id),
                participant_email TEXT NOT NULL,
                role TEXT NOT NULL,
                joined_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (workflow_id, participant_email)
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS workflow_participants_email ON workflow_participants(participant_email);"#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_messages (
                id BIGSERIAL PRIMARY KEY,
                workflow_id UUID NOT NULL REFERENCES workflows(id),
                sender_email TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                media_object_key TEXT,
                media_content_type TEXT
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS workflow_messages_cursor ON workflow_messages(workflow_id, created_at, id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_history (
                id UUID PRIMARY KEY,
                workflow_id UUID NOT NULL,
                event_type TEXT NOT NULL,
                performed_by TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                payload JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS workflow_history_workflow ON workflow_history(workflow_id, timestamp);"#,
            r#"
            CREATE TABLE IF NOT EXISTS role_grants (
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                granted_at TIMESTAMPTZ NOT NULL,
                UNIQUE (tenant_id, user_id, role)
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS role_grants_user ON role_grants(user_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS system_admins (
                user_id TEXT PRIMARY KEY
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tenant_settings (
                tenant_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (tenant_id, key)
            );
            "#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;
        }

        Ok(())
    }

    fn get<'r, T>(row: &'r PgRow, column: &str) -> StorageResult<T>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        row.try_get(column)
            .map_err(|e| StorageError::Query(e.to_string()))
    }

    fn parse<T>(value: &str) -> StorageResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        value
            .parse()
            .map_err(|e: T::Err| StorageError::InvalidData(e.to_string()))
    }

    fn workflow_from_row(row: &PgRow) -> StorageResult<Workflow> {
        let status: String = Self::get(row, "status")?;
        let completed_by: Option<String> = Self::get(row, "completed_by")?;
        Ok(Workflow {
            id: WorkflowId::from_uuid(Self::get(row, "id")?),
            tenant_id: TenantId::new(Self::get::<String>(row, "tenant_id")?),
            title: Self::get(row, "title")?,
            status: Self::parse::<WorkflowStatus>(&status)?,
            initiator_email: UserId::new(Self::get::<String>(row, "initiator_email")?),
            created_at: Self::get(row, "created_at")?,
            updated_at: Self::get(row, "updated_at")?,
            completed_at: Self::get(row, "completed_at")?,
            completed_by: completed_by.map(UserId::new),
            terminated_at: Self::get(row, "terminated_at")?,
            version: Self::get(row, "version")?,
        })
    }

    fn participant_from_row(row: &PgRow) -> StorageResult<Participant> {
        let role: String = Self::get(row, "role")?;
        Ok(Participant {
            workflow_id: WorkflowId::from_uuid(Self::get(row, "workflow_id")?),
            participant_email: UserId::new(Self::get::<String>(row, "participant_email")?),
            role: Self::parse::<ParticipantRole>(&role)?,
            joined_at: Self::get(row, "joined_at")?,
        })
    }

    fn message_from_row(row: &PgRow) -> StorageResult<WorkflowMessage> {
        let object_key: Option<String> = Self::get(row, "media_object_key")?;
        let content_type: Option<String> = Self::get(row, "media_content_type")?;
        Ok(WorkflowMessage {
            id: MessageId::new(Self::get(row, "id")?),
            workflow_id: WorkflowId::from_uuid(Self::get(row, "workflow_id")?),
            sender_email: UserId::new(Self::get::<String>(row, "sender_email")?),
            body: Self::get(row, "body")?,
            created_at: Self::get(row, "created_at")?,
            media_ref: object_key.map(|object_key| MediaRef {
                object_key,
                content_type,
            }),
        })
    }

    fn history_from_row(row: &PgRow) -> StorageResult<HistoryEvent> {
        let event_type: String = Self::get(row, "event_type")?;
        Ok(HistoryEvent {
            id: Self::get(row, "id")?,
            workflow_id: WorkflowId::from_uuid(Self::get(row, "workflow_id")?),
            event_type: Self::parse::<HistoryEventType>(&event_type)?,
            performed_by: UserId::new(Self::get::<String>(row, "performed_by")?),
            timestamp: Self::get(row, "timestamp")?,
            payload: Self::get::<Value>(row, "payload")?,
        })
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        err.as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == "23505")
    }
}

fn query_err(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Connection(err.to_string())
        }
        other => StorageError::Query(other.to_string()),
    }
}

#[async_trait]
impl WorkflowStorage for PostgresStorage {
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

        let mut tx = self.pool.begin().await.map_err(query_err)?;

        sqlx::query(&format!(
            "INSERT INTO workflows ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            WORKFLOW_COLUMNS
        ))
        .bind(workflow.id.as_uuid())
        .bind(workflow.tenant_id.as_str())
        .bind(&workflow.title)
        .bind(workflow.status.as_str())
        .bind(workflow.initiator_email.as_str())
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .bind(workflow.completed_at)
        .bind(workflow.completed_by.as_ref().map(UserId::as_str))
        .bind(workflow.terminated_at)
        .bind(workflow.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if Self::is_unique_violation(&e) {
                StorageError::Conflict(format!("workflow {} already exists", workflow.id))
            } else {
                query_err(e)
            }
        })?;

        for participant in &participants {
            sqlx::query(
                r#"
                INSERT INTO workflow_participants (workflow_id, participant_email, role, joined_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (workflow_id, participant_email) DO NOTHING
                "#,
            )
            .bind(participant.workflow_id.as_uuid())
            .bind(participant.participant_email.as_str())
            .bind(participant.role.as_str())
            .bind(participant.joined_at)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<Workflow>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM workflows WHERE id = $1",
            WORKFLOW_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;

        row.as_ref().map(Self::workflow_from_row).transpose()
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> StorageResult<Vec<Workflow>> {
        let mut query = filter.to_query();
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        rows.iter().map(Self::workflow_from_row).collect()
    }

    async fn update_workflow(
        &self,
        workflow: Workflow,
        expected_version: i64,
    ) -> StorageResult<Workflow> {
        let result = sqlx::query(
            r#"
            UPDATE workflows SET
                title = $3,
                status = $4,
                updated_at = $5,
                completed_at = $6,
                completed_by = $7,
                terminated_at = $8,
                version = $9
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(workflow.id.as_uuid())
        .bind(expected_version)
        .bind(&workflow.title)
        .bind(workflow.status.as_str())
        .bind(workflow.updated_at)
        .bind(workflow.completed_at)
        .bind(workflow.completed_by.as_ref().map(UserId::as_str))
        .bind(workflow.terminated_at)
        .bind(workflow.version)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 1 {
            return Ok(workflow);
        }

        match self.get_workflow(&workflow.id).await? {
            Some(_) => Err(StorageError::VersionConflict {
                id: workflow.id,
                expected: expected_version,
            }),
            None => Err(StorageError::NotFound(workflow.id.to_string())),
        }
    }

    async fn list_participants(&self, id: &WorkflowId) -> StorageResult<Vec<Participant>> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, participant_email, role, joined_at
            FROM workflow_participants
            WHERE workflow_id = $1
            ORDER BY joined_at, participant_email
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        rows.iter().map(Self::participant_from_row).collect()
    }

    async fn add_participant(
        &self,
        participant: Participant,
    ) -> StorageResult<(Participant, bool)> {
        if self.get_workflow(&participant.workflow_id).await?.is_none() {
            return Err(StorageError::NotFound(participant.workflow_id.to_string()));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO workflow_participants (workflow_id, participant_email, role, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (workflow_id, participant_email) DO NOTHING
            "#,
        )
        .bind(participant.workflow_id.as_uuid())
        .bind(participant.participant_email.as_str())
        .bind(participant.role.as_str())
        .bind(participant.joined_at)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 1 {
            return Ok((participant, true));
        }

        let row = sqlx::query(
            r#"
            SELECT workflow_id, participant_email, role, joined_at
            FROM workflow_participants
            WHERE workflow_id = $1 AND participant_email = $2
            "#,
        )
        .bind(participant.workflow_id.as_uuid())
        .bind(participant.participant_email.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)?;

        Ok((Self::participant_from_row(&row)?, false))
    }

    async fn workflow_stats(&self) -> StorageResult<WorkflowStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM workflows GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        let mut stats = WorkflowStats::default();
        for row in &rows {
            let status: String = Self::get(row, "status")?;
            let count = Self::get::<i64>(row, "count")? as usize;
            stats.total += count;
            match Self::parse::<WorkflowStatus>(&status)? {
                WorkflowStatus::Active => stats.active += count,
                WorkflowStatus::Completed => stats.completed += count,
                WorkflowStatus::Terminated => stats.terminated += count,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl MessageStorage for PostgresStorage {
    async fn insert_message(&self, message: NewMessage) -> StorageResult<WorkflowMessage> {
        let row = sqlx::query(&insert_message_sql())
            .bind(message.workflow_id.as_uuid())
            .bind(message.sender_email.as_str())
            .bind(&message.body)
            .bind(message.media_ref.as_ref().map(|m| m.object_key.as_str()))
            .bind(
                message
                    .media_ref
                    .as_ref()
                    .and_then(|m| m.content_type.as_deref()),
            )
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        if let Some(row) = row {
            return Self::message_from_row(&row);
        }

        match self.get_workflow(&message.workflow_id).await? {
            Some(workflow) => Err(StorageError::WorkflowNotActive {
                id: message.workflow_id,
                status: workflow.status,
            }),
            None => Err(StorageError::NotFound(message.workflow_id.to_string())),
        }
    }

    async fn latest_message_cursor(
        &self,
        workflow_id: &WorkflowId,
    ) -> StorageResult<Option<MessageCursor>> {
        let row = sqlx::query(
            r#"
            SELECT created_at, id FROM workflow_messages
            WHERE workflow_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => {
                let created_at: DateTime<Utc> = Self::get(&row, "created_at")?;
                let id: i64 = Self::get(&row, "id")?;
                Ok(Some(MessageCursor::new(created_at, MessageId::new(id))))
            }
            None => Ok(None),
        }
    }

    async fn list_messages_after(
        &self,
        workflow_id: &WorkflowId,
        after: Option<MessageCursor>,
        limit: usize,
    ) -> StorageResult<Vec<WorkflowMessage>> {
        let rows = match after {
            Some(cursor) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {} FROM workflow_messages
                    WHERE workflow_id = $1 AND (created_at, id) > ($2, $3)
                    ORDER BY created_at, id
                    LIMIT $4
                    "#,
                    MESSAGE_COLUMNS
                ))
                .bind(workflow_id.as_uuid())
                .bind(cursor.created_at)
                .bind(cursor.id.value())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    SELECT {} FROM workflow_messages
                    WHERE workflow_id = $1
                    ORDER BY created_at, id
                    LIMIT $2
                    "#,
                    MESSAGE_COLUMNS
                ))
                .bind(workflow_id.as_uuid())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(query_err)?;

        rows.iter().map(Self::message_from_row).collect()
    }

    async fn list_recent_messages(
        &self,
        workflow_id: &WorkflowId,
        limit: usize,
    ) -> StorageResult<Vec<WorkflowMessage>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM workflow_messages
            WHERE workflow_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(workflow_id.as_uuid())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        let mut messages = rows
            .iter()
            .map(Self::message_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl HistoryStorage for PostgresStorage {
    async fn append_history(&self, event: HistoryEvent) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_history (id, workflow_id, event_type, performed_by, timestamp, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.workflow_id.as_uuid())
        .bind(event.event_type.as_str())
        .bind(event.performed_by.as_str())
        .bind(event.timestamp)
        .bind(&event.payload)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn list_history(&self, workflow_id: &WorkflowId) -> StorageResult<Vec<HistoryEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, event_type, performed_by, timestamp, payload
            FROM workflow_history
            WHERE workflow_id = $1
            ORDER BY timestamp, id
            "#,
        )
        .bind(workflow_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        rows.iter().map(Self::history_from_row).collect()
    }
}

#[async_trait]
impl RoleStorage for PostgresStorage {
    async fn is_system_admin(&self, user: &UserId) -> StorageResult<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM system_admins WHERE user_id = $1")
            .bind(user.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(row.is_some())
    }

    async fn list_role_grants(
        &self,
        user: &UserId,
        tenant: Option<&TenantId>,
    ) -> StorageResult<Vec<RoleGrant>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, user_id, role, granted_at FROM role_grants
            WHERE user_id = $1 AND ($2::TEXT IS NULL OR tenant_id = $2)
            "#,
        )
        .bind(user.as_str())
        .bind(tenant.map(TenantId::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in &rows {
            let role: String = Self::get(row, "role")?;
            let Ok(role) = role.parse::<Role>() else {
                tracing::warn!(user = %user, role = %role, "Skipping unknown role grant");
                continue;
            };
            grants.push(RoleGrant {
                tenant_id: TenantId::new(Self::get::<String>(row, "tenant_id")?),
                user_id: UserId::new(Self::get::<String>(row, "user_id")?),
                role,
                granted_at: Self::get(row, "granted_at")?,
            });
        }
        Ok(grants)
    }

    async fn grant_role(&self, grant: RoleGrant) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO role_grants (tenant_id, user_id, role, granted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, user_id, role) DO NOTHING
            "#,
        )
        .bind(grant.tenant_id.as_str())
        .bind(grant.user_id.as_str())
        .bind(grant.role.as_str())
        .bind(grant.granted_at)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_system_admin(&self, user: &UserId) -> StorageResult<()> {
        sqlx::query("INSERT INTO system_admins (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(user.as_str())
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

#[async_trait]
impl TenantSettingsStorage for PostgresStorage {
    async fn get_tenant_setting(
        &self,
        tenant: &TenantId,
        key: &str,
    ) -> StorageResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM tenant_settings WHERE tenant_id = $1 AND key = $2")
            .bind(tenant.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        row.as_ref().map(|r| Self::get(r, "value")).transpose()
    }

    async fn put_tenant_setting(
        &self,
        tenant: &TenantId,
        key: &str,
        value: &str,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_settings (tenant_id, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(tenant.as_str())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }
}

impl Storage for PostgresStorage {}
