//! API response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ClientTimerState;

/// Response for timer endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerResponse {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// `null` when the user has no timer
    pub timer: Option<ClientTimerState>,
}

impl TimerResponse {
    /// Create a new timer response
    pub fn new(status: &str, message: String, timer: Option<ClientTimerState>) -> Self {
        Self {
            status: status.to_string(),
            message,
            timestamp: Utc::now(),
            timer,
        }
    }

    /// The command changed the timer
    pub fn applied(message: String, timer: Option<ClientTimerState>) -> Self {
        Self::new("applied", message, timer)
    }

    /// The command had nothing to act on
    pub fn unchanged(message: String, timer: Option<ClientTimerState>) -> Self {
        Self::new("unchanged", message, timer)
    }
}

/// Error body for rejected requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(message: String) -> Self {
        Self {
            status: "error".to_string(),
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Server status overview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub active_timers: usize,
    pub connected_surfaces: usize,
    pub uptime: String,
    pub port: u16,
    pub host: String,
    pub last_action: Option<String>,
    pub last_action_time: Option<DateTime<Utc>>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    /// Create a new health response
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
