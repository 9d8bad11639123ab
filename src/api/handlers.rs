//! HTTP endpoint handlers
//!
//! These mirror the socket commands for tooling and non-socket callers. They
//! go through the same store, so every connected surface sees the broadcast.

use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::{error, info, warn};

use crate::{
    error::SyncError,
    protocol::StartCommand,
    state::AppState,
};
use super::responses::{ErrorResponse, HealthResponse, StatusResponse, TimerResponse};

/// Error half of every fallible handler
pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(action: &str, user_id: &str, e: SyncError) -> ApiError {
    let status = match &e {
        SyncError::InvalidCommand(_) => {
            warn!("Rejected {} for {}: {}", action, user_id, e);
            StatusCode::BAD_REQUEST
        }
        SyncError::StoreUnavailable(_) | SyncError::Serialization(_) => {
            error!("Failed to {} timer for {}: {}", action, user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorResponse::new(e.to_string())))
}

/// Handle POST /users/:user_id/timer/start - Replace the user's timer
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(command): Json<StartCommand>,
) -> Result<Json<TimerResponse>, ApiError> {
    let timer = state
        .store
        .start(&user_id, command)
        .map_err(|e| api_error("start", &user_id, e))?;
    state.record_action("start", &user_id);
    info!("Start endpoint called for {} - timer {} running", user_id, timer.instance);
    Ok(Json(TimerResponse::applied(
        format!("Timer started for subtask {}", timer.subtask_id),
        Some(timer),
    )))
}

/// Handle POST /users/:user_id/timer/pause - Freeze the running timer
pub async fn pause_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<TimerResponse>, ApiError> {
    let paused = state
        .store
        .pause(&user_id)
        .map_err(|e| api_error("pause", &user_id, e))?;
    state.record_action("pause", &user_id);
    Ok(Json(match paused {
        Some(timer) => TimerResponse::applied("Timer paused".to_string(), Some(timer)),
        None => unchanged(&state, &user_id, "No running timer to pause")?,
    }))
}

/// Handle POST /users/:user_id/timer/resume - Continue a paused timer
pub async fn resume_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<TimerResponse>, ApiError> {
    let resumed = state
        .store
        .resume(&user_id)
        .map_err(|e| api_error("resume", &user_id, e))?;
    state.record_action("resume", &user_id);
    Ok(Json(match resumed {
        Some(timer) => TimerResponse::applied("Timer resumed".to_string(), Some(timer)),
        None => unchanged(&state, &user_id, "No paused timer to resume")?,
    }))
}

/// Handle POST /users/:user_id/timer/stop - Discard the timer
pub async fn stop_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<TimerResponse>, ApiError> {
    let stopped = state
        .store
        .stop(&user_id)
        .map_err(|e| api_error("stop", &user_id, e))?;
    state.record_action("stop", &user_id);
    Ok(Json(if stopped {
        TimerResponse::applied("Timer stopped".to_string(), None)
    } else {
        TimerResponse::unchanged("No timer to stop".to_string(), None)
    }))
}

/// Handle GET /users/:user_id/timer - Current timer or null
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<TimerResponse>, ApiError> {
    let timer = state
        .store
        .query(&user_id)
        .map_err(|e| api_error("query", &user_id, e))?;
    let message = if timer.is_some() { "Timer active" } else { "No timer" };
    Ok(Json(TimerResponse::new("ok", message.to_string(), timer)))
}

/// A silent no-op still reports the current truth
fn unchanged(state: &AppState, user_id: &str, message: &str) -> Result<TimerResponse, ApiError> {
    let timer = state
        .store
        .query(user_id)
        .map_err(|e| api_error("query", user_id, e))?;
    Ok(TimerResponse::unchanged(message.to_string(), timer))
}

/// Handle GET /status - Return current server status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, StatusCode> {
    let active_timers = state.store.active_timers().map_err(|e| {
        error!("Failed to count active timers: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let connected_surfaces = state.store.connected_surfaces().map_err(|e| {
        error!("Failed to count connected surfaces: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let (last_action, last_action_time) = state.get_last_action();

    Ok(Json(StatusResponse {
        active_timers,
        connected_surfaces,
        uptime: state.get_uptime(),
        port: state.port,
        host: state.host.clone(),
        last_action,
        last_action_time,
    }))
}

/// Handle GET /health - Health check endpoint
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
