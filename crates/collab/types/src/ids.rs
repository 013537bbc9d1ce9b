//! Strongly-typed identifiers for collab entities
//!
//! Workflow ids are UUID-based; tenants and users carry their external
//! string identifiers. All are wrapped in newtypes for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::ParseError;

/// Unique identifier for a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse either the bare UUID or the `workflow:`-prefixed display form
    pub fn parse(id: &str) -> Result<Self, ParseError> {
        let uuid_str = id.strip_prefix("workflow:").unwrap_or(id);
        Uuid::parse_str(uuid_str)
            .map(Self)
            .map_err(|_| ParseError::WorkflowId(id.to_string()))
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workflow:{}", self.0)
    }
}

/// Identifier of a tenant (isolation boundary)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable user identifier (the user's email address).
///
/// Normalized to trimmed lower-case so role grants, participant rows and
/// rate-limit keys all compare equal for the same person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(email: impl AsRef<str>) -> Self {
        Self(email.as_ref().trim().to_lowercase())
    }

    /// Like [`UserId::new`] but rejects blank or obviously malformed ids
    pub fn parse(email: &str) -> Result<Self, ParseError> {
        let id = Self::new(email);
        if id.0.is_empty() || id.0.contains(char::is_whitespace) {
            return Err(ParseError::UserId(email.to_string()));
        }
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned, monotonically increasing message id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_id_generation() {
        let id1 = WorkflowId::generate();
        let id2 = WorkflowId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_workflow_id_parse_accepts_both_forms() {
        let id = WorkflowId::generate();
        assert_eq!(WorkflowId::parse(&id.to_string()).unwrap(), id);
        assert_eq!(WorkflowId::parse(&id.as_uuid().to_string()).unwrap(), id);
        assert!(WorkflowId::parse("w1").is_err());
    }

    #[test]
    fn test_user_id_normalization() {
        assert_eq!(UserId::new("  Alice@Example.COM "), UserId::new("alice@example.com"));
        assert!(UserId::parse("   ").is_err());
        assert!(UserId::parse("bob smith@example.com").is_err());
    }
}
