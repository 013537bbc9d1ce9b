//! Storage layer for collab-daemon
//!
//! Provides persistent storage for workflows, participants, message
//! threads, audit history, role grants and tenant settings.

mod filter;
mod memory;
mod postgres;
mod traits;

pub use filter::{SortOrder, WorkflowFilter, WorkflowSort, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use traits::{
    HistoryStorage, MessageStorage, RoleStorage, Storage, StorageResult, TenantSettingsStorage,
    WorkflowStats, WorkflowStorage,
};
