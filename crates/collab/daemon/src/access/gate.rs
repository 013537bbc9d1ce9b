//! Access gate
//!
//! Every public workflow operation asks the gate first. The decision is a
//! pure function of the caller's resolved roles, the workflow and its
//! participants; `AccessGate` only adds the role lookup in front of it.

use super::resolver::{AccessibleTenants, ResolvedRoles, RoleResolver};
use crate::storage::StorageResult;
use collab_types::{Participant, ParticipantRole, TenantId, UserId, Workflow};
use serde::Serialize;
use std::fmt;

/// Operations the gate can authorize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    PostMessage,
    Transition,
    UpdateTitle,
    ManageParticipants,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Read,
        Action::PostMessage,
        Action::Transition,
        Action::UpdateTitle,
        Action::ManageParticipants,
    ];

    fn allowed_for_participant(&self) -> bool {
        matches!(
            self,
            Action::Read | Action::PostMessage | Action::Transition | Action::UpdateTitle
        )
    }

    fn allowed_for_tenant_admin(&self) -> bool {
        matches!(
            self,
            Action::Read | Action::Transition | Action::UpdateTitle | Action::ManageParticipants
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Read => "read",
            Action::PostMessage => "post_message",
            Action::Transition => "transition",
            Action::UpdateTitle => "update_title",
            Action::ManageParticipants => "manage_participants",
        };
        f.write_str(s)
    }
}

/// Structured deny reasons, mapped to distinct HTTP responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NotAuthenticated,
    /// Caller holds roles in the tenant, but none that permit the action
    NoTenantAccess,
    /// Caller has no relationship with the workflow
    NotParticipant,
    /// Request was scoped to a different tenant than the workflow's
    TenantMismatch,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::NotAuthenticated => "NOT_AUTHENTICATED",
            DenyReason::NoTenantAccess => "NO_TENANT_ACCESS",
            DenyReason::NotParticipant => "NOT_PARTICIPANT",
            DenyReason::TenantMismatch => "TENANT_MISMATCH",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenyReason::NotAuthenticated => "not authenticated",
            DenyReason::NoTenantAccess => "tenant role does not permit this action",
            DenyReason::NotParticipant => "not a participant of this workflow",
            DenyReason::TenantMismatch => "workflow belongs to a different tenant",
        };
        f.write_str(s)
    }
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    /// Convert into a `Result` for `?` propagation
    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(reason) => Err(reason),
        }
    }
}

/// Decide whether `caller` may perform `action` on `workflow`.
///
/// `roles` must be resolved for `workflow.tenant_id`.
pub fn decide(
    caller: Option<&UserId>,
    roles: &ResolvedRoles,
    request_tenant: Option<&TenantId>,
    workflow: &Workflow,
    participants: &[Participant],
    action: Action,
) -> AccessDecision {
    let Some(caller) = caller else {
        return AccessDecision::Deny(DenyReason::NotAuthenticated);
    };

    if roles.is_system_admin {
        return AccessDecision::Allow;
    }

    if request_tenant.is_some_and(|t| t != &workflow.tenant_id) {
        return AccessDecision::Deny(DenyReason::TenantMismatch);
    }

    let membership = participants
        .iter()
        .find(|p| &p.participant_email == caller)
        .map(|p| p.role);

    match membership {
        Some(_) if action.allowed_for_participant() => return AccessDecision::Allow,
        Some(ParticipantRole::Initiator) if action == Action::ManageParticipants => {
            return AccessDecision::Allow;
        }
        _ => {}
    }

    if roles.has_tenant_role() {
        if action == Action::Read {
            return AccessDecision::Allow;
        }
        if roles.is_tenant_admin() && action.allowed_for_tenant_admin() {
            return AccessDecision::Allow;
        }
        return AccessDecision::Deny(DenyReason::NoTenantAccess);
    }

    AccessDecision::Deny(DenyReason::NotParticipant)
}

/// Composition of role resolution and [`decide`]
#[derive(Clone)]
pub struct AccessGate {
    resolver: RoleResolver,
}

impl AccessGate {
    pub fn new(resolver: RoleResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    /// Authorize an action on an existing workflow
    pub async fn authorize(
        &self,
        caller: Option<&UserId>,
        request_tenant: Option<&TenantId>,
        workflow: &Workflow,
        participants: &[Participant],
        action: Action,
    ) -> StorageResult<AccessDecision> {
        let roles = match caller {
            Some(user) => {
                self.resolver
                    .resolve_roles(user, Some(&workflow.tenant_id))
                    .await?
            }
            None => ResolvedRoles::empty(),
        };

        let decision = decide(caller, &roles, request_tenant, workflow, participants, action);

        if let AccessDecision::Deny(reason) = decision {
            tracing::debug!(
                workflow_id = %workflow.id,
                action = %action,
                reason = reason.code(),
                "Access denied"
            );
        }

        Ok(decision)
    }

    /// Authorize creating a workflow in `tenant`
    pub async fn authorize_create(
        &self,
        caller: Option<&UserId>,
        tenant: &TenantId,
    ) -> StorageResult<AccessDecision> {
        let Some(user) = caller else {
            return Ok(AccessDecision::Deny(DenyReason::NotAuthenticated));
        };

        let roles = self.resolver.resolve_roles(user, Some(tenant)).await?;
        if roles.is_system_admin || roles.has_tenant_role() {
            Ok(AccessDecision::Allow)
        } else {
            Ok(AccessDecision::Deny(DenyReason::NoTenantAccess))
        }
    }

    /// Tenants whose workflows `caller` may list
    pub async fn scope_for(&self, caller: &UserId) -> StorageResult<AccessibleTenants> {
        let roles = self.resolver.resolve_roles(caller, None).await?;
        Ok(roles.accessible_tenants)
    }
}
