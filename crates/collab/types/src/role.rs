//! Tenant role grants
//!
//! One grant table with a uniqueness constraint on `(tenant, user, role)`.

use crate::{ParseError, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a user holds within a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May administer every workflow in the tenant
    TenantAdmin,
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::TenantAdmin => "tenant_admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }

    pub fn is_tenant_admin(&self) -> bool {
        matches!(self, Role::TenantAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tenant_admin" => Ok(Role::TenantAdmin),
            "member" => Ok(Role::Member),
            "viewer" => Ok(Role::Viewer),
            other => Err(ParseError::Role(other.to_string())),
        }
    }
}

/// A user's role within one tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleGrant {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub granted_at: DateTime<Utc>,
}

impl RoleGrant {
    pub fn new(tenant_id: TenantId, user_id: UserId, role: Role) -> Self {
        Self {
            tenant_id,
            user_id,
            role,
            granted_at: Utc::now(),
        }
    }

    /// The uniqueness key of the grant table
    pub fn key(&self) -> (&TenantId, &UserId, Role) {
        (&self.tenant_id, &self.user_id, self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("tenant_admin".parse::<Role>().unwrap(), Role::TenantAdmin);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert!("TenantAdmin".parse::<Role>().is_err());
        assert!(Role::TenantAdmin.is_tenant_admin());
        assert!(!Role::Member.is_tenant_admin());
    }
}
