//! REST API

pub mod handlers;
pub mod identity;
pub mod router;
pub mod state;
