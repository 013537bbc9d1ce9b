//! Effective role resolution
//!
//! One admin lookup, one grant query, then a set union. Missing roles are
//! represented as empty sets; callers decide whether empty means deny.

use crate::storage::{Storage, StorageResult};
use collab_types::{Role, TenantId, UserId};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Tenants whose workflows a user may see through role grants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessibleTenants {
    /// Every tenant; used for system admins and never enumerated
    All,
    Only(BTreeSet<TenantId>),
}

impl AccessibleTenants {
    pub fn none() -> Self {
        AccessibleTenants::Only(BTreeSet::new())
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        match self {
            AccessibleTenants::All => true,
            AccessibleTenants::Only(tenants) => tenants.contains(tenant),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AccessibleTenants::Only(tenants) if tenants.is_empty())
    }
}

/// A caller's effective roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoles {
    pub is_system_admin: bool,

    /// Roles in the tenant passed to `resolve_roles`; empty when none was given
    pub tenant_roles: BTreeSet<Role>,

    pub accessible_tenants: AccessibleTenants,
}

impl ResolvedRoles {
    pub fn system_admin() -> Self {
        Self {
            is_system_admin: true,
            tenant_roles: BTreeSet::new(),
            accessible_tenants: AccessibleTenants::All,
        }
    }

    pub fn empty() -> Self {
        Self {
            is_system_admin: false,
            tenant_roles: BTreeSet::new(),
            accessible_tenants: AccessibleTenants::none(),
        }
    }

    pub fn has_tenant_role(&self) -> bool {
        !self.tenant_roles.is_empty()
    }

    pub fn is_tenant_admin(&self) -> bool {
        self.tenant_roles.iter().any(Role::is_tenant_admin)
    }
}

/// Aggregates admin status and tenant grants for a user
#[derive(Clone)]
pub struct RoleResolver {
    storage: Arc<dyn Storage>,
}

impl RoleResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Resolve `user`'s roles, scoped to `tenant` when given
    pub async fn resolve_roles(
        &self,
        user: &UserId,
        tenant: Option<&TenantId>,
    ) -> StorageResult<ResolvedRoles> {
        if self.storage.is_system_admin(user).await? {
            return Ok(ResolvedRoles::system_admin());
        }

        let grants = self.storage.list_role_grants(user, None).await?;

        let mut tenant_roles = BTreeSet::new();
        let mut tenants = BTreeSet::new();
        for grant in grants {
            if tenant == Some(&grant.tenant_id) {
                tenant_roles.insert(grant.role);
            }
            tenants.insert(grant.tenant_id);
        }

        tracing::trace!(
            user = %user,
            tenants = tenants.len(),
            roles = tenant_roles.len(),
            "Resolved roles"
        );

        Ok(ResolvedRoles {
            is_system_admin: false,
            tenant_roles,
            accessible_tenants: AccessibleTenants::Only(tenants),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorage, RoleStorage};
    use collab_types::RoleGrant;

    async fn storage_with_grants() -> Arc<InMemoryStorage> {
        let storage = Arc::new(InMemoryStorage::new());
        let alice = UserId::new("alice@example.com");
        for (tenant, role) in [("t1", Role::Member), ("t1", Role::TenantAdmin), ("t2", Role::Viewer)] {
            storage
                .grant_role(RoleGrant::new(TenantId::new(tenant), alice.clone(), role))
                .await
                .unwrap();
        }
        storage
            .add_system_admin(&UserId::new("root@example.com"))
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_union_of_roles_for_tenant() {
        let storage = storage_with_grants().await;
        let resolver = RoleResolver::new(storage);

        let roles = resolver
            .resolve_roles(&UserId::new("alice@example.com"), Some(&TenantId::new("t1")))
            .await
            .unwrap();

        assert!(!roles.is_system_admin);
        assert_eq!(
            roles.tenant_roles,
            BTreeSet::from([Role::Member, Role::TenantAdmin])
        );
        assert!(roles.is_tenant_admin());
        assert!(roles.accessible_tenants.contains(&TenantId::new("t2")));
        assert!(!roles.accessible_tenants.contains(&TenantId::new("t3")));
    }

    #[tokio::test]
    async fn test_no_tenant_gives_accessible_set_only() {
        let storage = storage_with_grants().await;
        let resolver = RoleResolver::new(storage);

        let roles = resolver
            .resolve_roles(&UserId::new("alice@example.com"), None)
            .await
            .unwrap();
        assert!(roles.tenant_roles.is_empty());
        assert_eq!(
            roles.accessible_tenants,
            AccessibleTenants::Only(BTreeSet::from([TenantId::new("t1"), TenantId::new("t2")]))
        );
    }

    #[tokio::test]
    async fn test_admin_gets_sentinel() {
        let storage = storage_with_grants().await;
        let resolver = RoleResolver::new(storage);

        let roles = resolver
            .resolve_roles(&UserId::new("root@example.com"), Some(&TenantId::new("t9")))
            .await
            .unwrap();
        assert!(roles.is_system_admin);
        assert_eq!(roles.accessible_tenants, AccessibleTenants::All);
    }

    #[tokio::test]
    async fn test_unknown_user_resolves_to_empty_sets() {
        let storage = storage_with_grants().await;
        let resolver = RoleResolver::new(storage);

        let roles = resolver
            .resolve_roles(&UserId::new("carol@example.com"), Some(&TenantId::new("t1")))
            .await
            .unwrap();
        assert_eq!(roles, ResolvedRoles::empty());
        assert!(roles.accessible_tenants.is_empty());
    }
}
