//! State management module
//!
//! This module contains the authoritative timer store and everything it is
//! built from.

pub mod app_state;
pub mod clock;
pub mod store;
pub mod timer_state;

// Re-export main types
pub use app_state::AppState;
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{CompletedTimer, TimerStore, UserId};
pub use timer_state::{ClientTimerState, TimerState};
