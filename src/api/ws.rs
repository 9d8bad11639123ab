//! WebSocket surface sessions
//!
//! One socket per surface. Commands from the socket go straight to the store;
//! everything the store broadcasts for the user is forwarded back out.

use std::{sync::Arc, time::Duration};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::{
    error::SyncError,
    protocol::{Command, Event},
    state::AppState,
};

/// Keep-alive ping period
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Handle GET /users/:user_id/ws - Upgrade to a surface session
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| surface_session(socket, state, user_id))
}

async fn surface_session(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let mut events = match state.store.subscribe(&user_id) {
        Ok(rx) => rx,
        Err(e) => {
            error!("Failed to subscribe surface for {}: {}", user_id, e);
            return;
        }
    };
    info!("Surface connected for {}", user_id);

    let (mut sender, mut receiver) = socket.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        // The surface missed events; hand it the current truth instead
                        warn!("Surface for {} lagged by {} events, resyncing", user_id, skipped);
                        match state.store.query(&user_id) {
                            Ok(timer) => Event::Snapshot { timer },
                            Err(e) => {
                                error!("Failed to resync surface for {}: {}", user_id, e);
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = send_event(&mut sender, &event).await {
                    debug!("Surface for {} went away: {}", user_id, e);
                    break;
                }
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_frame(&state, &user_id, &text) {
                            if let Err(e) = send_event(&mut sender, &reply).await {
                                debug!("Surface for {} went away: {}", user_id, e);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Surface socket error for {}: {}", user_id, e);
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("Surface disconnected for {}", user_id);
}

/// Parse and apply one text frame. Returns the reply for this surface only.
fn handle_frame(state: &AppState, user_id: &str, text: &str) -> Option<Event> {
    let command: Command = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Unparseable frame from {}: {}", user_id, e);
            return Some(Event::Error {
                message: SyncError::InvalidCommand(e.to_string()).to_string(),
            });
        }
    };

    let name = command.name();
    debug!("Surface command {} from {}", name, user_id);
    if !matches!(command, Command::Query) {
        state.record_action(name, user_id);
    }

    match state.store.apply(user_id, command) {
        Ok(reply) => reply,
        Err(e @ SyncError::InvalidCommand(_)) => {
            warn!("Rejected {} from {}: {}", name, user_id, e);
            Some(Event::Error { message: e.to_string() })
        }
        Err(e) => {
            error!("Failed to apply {} for {}: {}", name, user_id, e);
            Some(Event::Error { message: e.to_string() })
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &Event,
) -> Result<(), SyncError> {
    let json = serde_json::to_string(event)?;
    sender
        .send(Message::Text(json))
        .await
        .map_err(|e| SyncError::StoreUnavailable(format!("socket send failed: {}", e)))
}
