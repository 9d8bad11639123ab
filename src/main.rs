//! Focus Sync - authoritative focus timer server
//!
//! This is the main entry point for the focus-sync server.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use focus_sync::{
    api::create_router,
    config::Config,
    state::{AppState, SystemClock},
    tasks::completion_watch_task,
    utils::shutdown_signal,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing with appropriate log level
    tracing_subscriber::fmt()
        .with_env_filter(format!("focus_sync={},tower_http=info", config.log_level()))
        .init();

    info!("Starting focus-sync server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: host={}, port={}, watch={}ms, buffer={}",
          config.host, config.port, config.watch_interval_ms, config.channel_capacity);

    // Create application state
    let state = Arc::new(AppState::new(
        config.port,
        config.host.clone(),
        Arc::new(SystemClock),
        config.channel_capacity,
    ));

    // Start the completion watch background task
    let store = Arc::clone(&state.store);
    let period = config.watch_interval();
    tokio::spawn(async move {
        completion_watch_task(store, period).await;
    });

    // Create HTTP router with all endpoints
    let app = create_router(state);

    // Bind to the specified address
    let addr = config.address();
    let listener = TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /users/:user_id/ws           - Surface WebSocket");
    info!("  GET  /users/:user_id/timer        - Query current timer");
    info!("  POST /users/:user_id/timer/start  - Start or replace timer");
    info!("  POST /users/:user_id/timer/pause  - Pause timer");
    info!("  POST /users/:user_id/timer/resume - Resume timer");
    info!("  POST /users/:user_id/timer/stop   - Stop timer");
    info!("  GET  /status                      - Server status");
    info!("  GET  /health                      - Health check");

    // Setup graceful shutdown
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
