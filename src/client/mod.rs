//! Surface-side client module
//!
//! Everything a surface needs to mirror the authoritative timer: the protocol
//! connection, the drift-free local countdown, and the completion pipeline.

pub mod completion;
pub mod connection;
pub mod reconciliation;
pub mod session;

// Re-export main types
pub use completion::{CompletionEffects, CompletionOutcome, CompletionPipeline, CompletionSource, LogEffects};
pub use connection::{ConnectionStatus, SyncClient};
pub use reconciliation::{ReconciliationTimer, TickOutcome, TimerView, TICK_INTERVAL};
pub use session::{spawn_driver, CommandSink, FocusSession, StaticTitles, TitleSource};
