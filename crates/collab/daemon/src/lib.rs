//! Collab Daemon library
//!
//! This module provides the core components for the collab daemon:
//! - REST API handlers and update streams
//! - Storage backends
//! - Role resolution and access decisions
//! - Workflow lifecycle and audit history
//! - Server lifecycle management

#![deny(unsafe_code)]

pub mod access;
pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod ratelimit;
pub mod server;
pub mod storage;
pub mod stream;

pub use access::{AccessGate, RoleResolver};
pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult, StorageError};
pub use history::HistoryLogger;
pub use lifecycle::WorkflowStateMachine;
pub use server::Server;
pub use storage::{InMemoryStorage, PostgresStorage, Storage};
pub use stream::UpdateStream;
