//! Focus Sync - keeps one focus timer per user in sync across surfaces
//!
//! The server side owns the authoritative timer per user and fans every
//! change out over WebSocket. The client side mirrors that timer with a
//! drift-free local countdown, fires completion effects exactly once, and
//! feeds whatever presentation surfaces are open.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod state;
pub mod surfaces;
pub mod tasks;
pub mod utils;

// Re-export commonly used types
pub use api::create_router;
pub use config::Config;
pub use error::{ClientError, SurfaceError, SyncError};
pub use protocol::{Command, Event, StartCommand};
pub use state::{AppState, TimerStore};
pub use utils::signals::shutdown_signal;
