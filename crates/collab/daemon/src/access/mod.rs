//! Role resolution and authorization

mod gate;
mod resolver;

pub use gate::{decide, AccessDecision, AccessGate, Action, DenyReason};
pub use resolver::{AccessibleTenants, ResolvedRoles, RoleResolver};
