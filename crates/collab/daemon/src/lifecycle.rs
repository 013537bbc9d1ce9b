//! Workflow state machine
//!
//! Every status or title change is read, validated and written back with a
//! compare-and-swap on the workflow version. A lost race re-reads and
//! re-validates, so two concurrent `complete` requests produce one success
//! and one `AlreadyInState`.

use crate::error::{ApiError, ConflictCode, StorageError};
use crate::history::HistoryLogger;
use crate::storage::Storage;
use chrono::Utc;
use collab_types::{
    HistoryEventType, Transition, TransitionRejection, UserId, Workflow, WorkflowId,
    WorkflowStatus,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Compare-and-swap attempts before giving up
pub const MAX_CAS_ATTEMPTS: usize = 3;

/// Longest accepted workflow title, in characters
pub const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("{0}")]
    Rejected(#[from] TransitionRejection),

    #[error("{0}")]
    Validation(String),

    #[error("Workflow {id} kept changing after {attempts} attempts")]
    Contended { id: WorkflowId, attempts: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(id) => ApiError::NotFound(format!("Workflow {}", id)),
            LifecycleError::Rejected(rejection @ TransitionRejection::AlreadyInState(_)) => {
                ApiError::conflict(ConflictCode::AlreadyInState, rejection.to_string())
            }
            LifecycleError::Rejected(rejection @ TransitionRejection::NotAllowed { .. }) => {
                ApiError::InvalidTransition(rejection.to_string())
            }
            LifecycleError::Validation(msg) => ApiError::Validation(msg),
            err @ LifecycleError::Contended { .. } => {
                ApiError::conflict(ConflictCode::VersionConflict, err.to_string())
            }
            LifecycleError::Storage(e) => ApiError::Storage(e),
        }
    }
}

/// Validate and normalize a workflow title
pub fn validate_title(title: &str) -> Result<String, LifecycleError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(LifecycleError::Validation("title must not be blank".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(LifecycleError::Validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

/// A validated change request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowUpdate {
    pub transition: Option<Transition>,
    pub title: Option<String>,
}

impl WorkflowUpdate {
    /// Build from the PUT body fields. `status` names the target state and
    /// must agree with `action` when both are present.
    pub fn from_request(
        action: Option<Transition>,
        status: Option<WorkflowStatus>,
        title: Option<&str>,
    ) -> Result<Self, LifecycleError> {
        let transition = match (action, status.map(Transition::into_status)) {
            (Some(action), Some(implied)) if action != implied => {
                return Err(LifecycleError::Validation(format!(
                    "action '{}' does not lead to status '{}'",
                    action,
                    implied.target()
                )));
            }
            (action, implied) => action.or(implied),
        };

        let title = title.map(validate_title).transpose()?;

        if transition.is_none() && title.is_none() {
            return Err(LifecycleError::Validation(
                "request must contain an action, status or title".into(),
            ));
        }

        Ok(Self { transition, title })
    }
}

/// Applies lifecycle changes with optimistic concurrency
#[derive(Clone)]
pub struct WorkflowStateMachine {
    storage: Arc<dyn Storage>,
    history: HistoryLogger,
}

impl WorkflowStateMachine {
    pub fn new(storage: Arc<dyn Storage>, history: HistoryLogger) -> Self {
        Self { storage, history }
    }

    /// Apply `update` on behalf of `actor`, who must already be authorized
    pub async fn apply(
        &self,
        id: WorkflowId,
        update: &WorkflowUpdate,
        actor: &UserId,
    ) -> Result<Workflow, LifecycleError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self
                .storage
                .get_workflow(&id)
                .await?
                .ok_or(LifecycleError::NotFound(id))?;

            let Some(next) = Self::next_revision(&current, update, actor)? else {
                return Ok(current);
            };

            match self.storage.update_workflow(next, current.version).await {
                Ok(stored) => {
                    tracing::info!(
                        workflow_id = %id,
                        user = %actor,
                        from = %current.status,
                        to = %stored.status,
                        version = stored.version,
                        "Workflow updated"
                    );
                    self.record_history(&current, &stored, actor).await;
                    return Ok(stored);
                }
                Err(StorageError::VersionConflict { .. }) => {
                    tracing::debug!(
                        workflow_id = %id,
                        attempt,
                        "Version conflict, re-reading workflow"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(workflow_id = %id, "Giving up after repeated version conflicts");
        Err(LifecycleError::Contended {
            id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// The revision to write, or `None` when the update changes nothing
    fn next_revision(
        current: &Workflow,
        update: &WorkflowUpdate,
        actor: &UserId,
    ) -> Result<Option<Workflow>, LifecycleError> {
        let now = Utc::now();
        let title = update.title.as_deref().filter(|t| *t != current.title);

        let next = match (update.transition, title) {
            (Some(transition), title) => {
                let mut next = current.apply_transition(transition, actor, now)?;
                if let Some(title) = title {
                    next.title = title.to_string();
                }
                next
            }
            (None, Some(title)) => current.with_title(title, now),
            (None, None) => return Ok(None),
        };

        Ok(Some(next))
    }

    async fn record_history(&self, before: &Workflow, after: &Workflow, actor: &UserId) {
        let mut changes = Map::new();

        if before.status != after.status {
            let specific = match after.status {
                WorkflowStatus::Completed => HistoryEventType::WorkflowCompleted,
                WorkflowStatus::Terminated => HistoryEventType::WorkflowTerminated,
                WorkflowStatus::Active => HistoryEventType::WorkflowReactivated,
            };
            self.history
                .append(
                    after.id,
                    specific,
                    actor,
                    json!({ "from": before.status, "to": after.status }),
                )
                .await;

            changes.insert("from".into(), json!(before.status));
            changes.insert("to".into(), json!(after.status));
        }

        if before.title != after.title {
            changes.insert(
                "title".into(),
                json!({ "from": before.title, "to": after.title }),
            );
        }

        self.history
            .append(
                after.id,
                HistoryEventType::WorkflowUpdated,
                actor,
                Value::Object(changes),
            )
            .await;
    }
}
