//! Background tasks module
//!
//! This module contains background tasks that run alongside the HTTP server.

pub mod completion_watch;

// Re-export main functions
pub use completion_watch::completion_watch_task;
