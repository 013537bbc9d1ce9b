//! Typed workflow list filters
//!
//! Every filterable field and sort key is a closed type here; the
//! PostgreSQL rendering binds all user-supplied values as parameters.

use crate::access::AccessibleTenants;
use collab_types::{Participant, TenantId, UserId, Workflow, WorkflowStatus};
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use std::cmp::Ordering;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 200;

/// Sortable workflow columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowSort {
    CreatedAt,
    #[default]
    UpdatedAt,
    Title,
}

impl WorkflowSort {
    fn column(&self) -> &'static str {
        match self {
            WorkflowSort::CreatedAt => "w.created_at",
            WorkflowSort::UpdatedAt => "w.updated_at",
            WorkflowSort::Title => "w.title",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filter for listing workflows visible to a caller
#[derive(Debug, Clone)]
pub struct WorkflowFilter {
    /// Tenants whose workflows are visible through role grants
    pub scope: AccessibleTenants,

    /// Workflows this user participates in are visible regardless of scope
    pub member: Option<UserId>,

    pub tenant: Option<TenantId>,
    pub status: Option<WorkflowStatus>,

    /// Only workflows this user participates in
    pub participant: Option<UserId>,

    pub sort: WorkflowSort,
    pub order: SortOrder,
    pub limit: usize,
    pub offset: usize,
}

impl WorkflowFilter {
    /// Filter over everything visible to `scope` plus `member`'s own workflows
    pub fn visible_to(scope: AccessibleTenants, member: Option<UserId>) -> Self {
        Self {
            scope,
            member,
            tenant: None,
            status: None,
            participant: None,
            sort: WorkflowSort::default(),
            order: SortOrder::default(),
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, MAX_LIST_LIMIT);
        self
    }

    fn is_participant(participants: &[Participant], user: &UserId) -> bool {
        participants.iter().any(|p| &p.participant_email == user)
    }

    /// Evaluate the filter against one workflow (in-memory backend)
    pub fn matches(&self, workflow: &Workflow, participants: &[Participant]) -> bool {
        let visible = self.scope.contains(&workflow.tenant_id)
            || self
                .member
                .as_ref()
                .is_some_and(|m| Self::is_participant(participants, m));
        if !visible {
            return false;
        }

        if self.tenant.as_ref().is_some_and(|t| t != &workflow.tenant_id) {
            return false;
        }
        if self.status.is_some_and(|s| s != workflow.status) {
            return false;
        }
        if let Some(participant) = &self.participant {
            if !Self::is_participant(participants, participant) {
                return false;
            }
        }
        true
    }

    /// Ordering used by the in-memory backend; mirrors `ORDER BY` below
    pub fn compare(&self, a: &Workflow, b: &Workflow) -> Ordering {
        let primary = match self.sort {
            WorkflowSort::CreatedAt => a.created_at.cmp(&b.created_at),
            WorkflowSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            WorkflowSort::Title => a.title.cmp(&b.title),
        }
        .then_with(|| a.id.cmp(&b.id));

        match self.order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        }
    }

    /// Render as a parameterized PostgreSQL query
    pub fn to_query(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(
            "SELECT w.id, w.tenant_id, w.title, w.status, w.initiator_email, w.created_at, \
             w.updated_at, w.completed_at, w.completed_by, w.terminated_at, w.version \
             FROM workflows w WHERE ",
        );

        match (&self.scope, &self.member) {
            (AccessibleTenants::All, _) => {
                qb.push("TRUE");
            }
            (AccessibleTenants::Only(tenants), member) => {
                let tenants: Vec<String> = tenants.iter().map(|t| t.as_str().to_owned()).collect();
                qb.push("(w.tenant_id = ANY(");
                qb.push_bind(tenants);
                qb.push(")");
                if let Some(member) = member {
                    qb.push(
                        " OR EXISTS (SELECT 1 FROM workflow_participants p \
                         WHERE p.workflow_id = w.id AND p.participant_email = ",
                    );
                    qb.push_bind(member.as_str().to_owned());
                    qb.push(")");
                }
                qb.push(")");
            }
        }

        if let Some(tenant) = &self.tenant {
            qb.push(" AND w.tenant_id = ");
            qb.push_bind(tenant.as_str().to_owned());
        }

        if let Some(status) = self.status {
            qb.push(" AND w.status = ");
            qb.push_bind(status.as_str());
        }

        if let Some(participant) = &self.participant {
            qb.push(
                " AND EXISTS (SELECT 1 FROM workflow_participants p2 \
                 WHERE p2.workflow_id = w.id AND p2.participant_email = ",
            );
            qb.push_bind(participant.as_str().to_owned());
            qb.push(")");
        }

        qb.push(" ORDER BY ");
        qb.push(self.sort.column());
        qb.push(" ");
        qb.push(self.order.keyword());
        qb.push(", w.id ");
        qb.push(self.order.keyword());

        qb.push(" LIMIT ");
        qb.push_bind(self.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(self.offset as i64);

        qb
    }
}
