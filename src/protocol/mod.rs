//! Synchronization protocol module
//!
//! Command and event vocabulary shared by the server and the protocol client.

pub mod messages;

// Re-export main types
pub use messages::{Command, Event, StartCommand};
