//! HTTP API module
//!
//! This module contains the WebSocket surface endpoint, the HTTP mirror of the
//! timer commands, and their response structures.

pub mod handlers;
pub mod responses;
pub mod ws;

use std::sync::Arc;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use handlers::*;

/// Create the HTTP router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users/:user_id/ws", get(ws::ws_handler))
        .route("/users/:user_id/timer", get(query_handler))
        .route("/users/:user_id/timer/start", post(start_handler))
        .route("/users/:user_id/timer/pause", post(pause_handler))
        .route("/users/:user_id/timer/resume", post(resume_handler))
        .route("/users/:user_id/timer/stop", post(stop_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
