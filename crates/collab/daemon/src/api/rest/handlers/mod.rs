//! API request handlers

mod health;
mod messages;
mod participants;
mod stream;
mod workflows;

pub use health::*;
pub use messages::*;
pub use participants::*;
pub use stream::*;
pub use workflows::*;
