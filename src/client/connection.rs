//! Protocol client: one WebSocket per surface with automatic reconnection
//!
//! Commands are refused while the socket is down. Every (re)connect begins
//! with a `query`, so local state is always rebuilt from the server's answer
//! rather than trusted across a gap.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::ClientError,
    protocol::{Command, Event, StartCommand},
};

/// Maximum reconnect delay.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Base reconnect delay.
const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Ping interval.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Inbound events buffered for slow consumers.
const EVENT_BUFFER: usize = 64;

/// Connection status as seen by the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Handle to a background connection for one user
#[derive(Debug)]
pub struct SyncClient {
    endpoint: Url,
    outbound: mpsc::UnboundedSender<String>,
    status: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<Event>,
    task: JoinHandle<()>,
}

impl SyncClient {
    /// Build the socket URL for `user_id` under `server`.
    ///
    /// `http`/`https` bases are mapped to `ws`/`wss`.
    pub fn endpoint(server: &str, user_id: &str) -> Result<Url, ClientError> {
        let mut url = Url::parse(server).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => return Err(ClientError::InvalidUrl(format!("unsupported scheme {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl(format!("cannot use scheme {}", scheme)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(server.to_string()))?
            .pop_if_empty()
            .extend(["users", user_id, "ws"]);
        Ok(url)
    }

    /// Spawn the connection loop. Returns immediately; watch [`Self::status`].
    pub fn connect(server: &str, user_id: &str) -> Result<Self, ClientError> {
        let endpoint = Self::endpoint(server, user_id)?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let task = tokio::spawn(connection_loop(
            endpoint.to_string(),
            status_tx,
            events.clone(),
            outbound_rx,
        ));

        Ok(Self {
            endpoint,
            outbound,
            status,
            events,
            task,
        })
    }

    pub fn endpoint_url(&self) -> &Url {
        &self.endpoint
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Watch status transitions
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Wait until the socket is up, or give up after `timeout`
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut status = self.status.clone();
        let connected = matches!(
            tokio::time::timeout(
                timeout,
                status.wait_for(|s| *s == ConnectionStatus::Connected),
            )
            .await,
            Ok(Ok(_))
        );
        if connected {
            Ok(())
        } else {
            Err(ClientError::Disconnected)
        }
    }

    /// Every event the server sends on this connection
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Queue a command. Refused while disconnected.
    pub fn send(&self, command: &Command) -> Result<(), ClientError> {
        if !self.is_connected() {
            debug!("Suppressing {} while disconnected", command.name());
            return Err(ClientError::Disconnected);
        }
        let json = serde_json::to_string(command)?;
        self.outbound
            .send(json)
            .map_err(|_| ClientError::Disconnected)
    }

    pub fn start(&self, task_id: &str, subtask_id: &str, duration_minutes: f64) -> Result<(), ClientError> {
        self.send(&Command::Start(StartCommand {
            task_id: task_id.to_string(),
            subtask_id: subtask_id.to_string(),
            duration_minutes,
        }))
    }

    pub fn pause(&self) -> Result<(), ClientError> {
        self.send(&Command::Pause)
    }

    pub fn resume(&self) -> Result<(), ClientError> {
        self.send(&Command::Resume)
    }

    pub fn stop(&self) -> Result<(), ClientError> {
        self.send(&Command::Stop)
    }

    pub fn query(&self) -> Result<(), ClientError> {
        self.send(&Command::Query)
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Delay before reconnect attempt `attempt`
fn backoff_delay(attempt: u32) -> Duration {
    BASE_RECONNECT_DELAY
        .saturating_mul(2u32.saturating_pow(attempt.min(5)))
        .min(MAX_RECONNECT_DELAY)
}

/// Delay before the next connect and the attempt number it will be.
///
/// The first retry after a drop waits the base delay.
fn reconnect_step(attempt: u32) -> (Duration, u32) {
    (backoff_delay(attempt), attempt.saturating_add(1))
}

/// Run the WebSocket connection loop with automatic reconnection.
async fn connection_loop(
    url: String,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<Event>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let mut attempt: u32 = 0;

    loop {
        let e = try_connect(&url, &status, &events, &mut outbound_rx, &mut attempt).await;
        warn!("Timer connection lost (attempt {}): {}", attempt, e);
        let (delay, next) = reconnect_step(attempt);
        attempt = next;
        status.send_replace(ConnectionStatus::Reconnecting { attempt });
        tokio::time::sleep(delay).await;
    }
}

/// Run one connection until it fails. Always returns the reason it ended.
async fn try_connect(
    url: &str,
    status: &watch::Sender<ConnectionStatus>,
    events: &broadcast::Sender<Event>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    attempt: &mut u32,
) -> ClientError {
    let (ws_stream, _) = match connect_async(url).await {
        Ok(connected) => connected,
        Err(e) => return ClientError::Transport(format!("connect: {}", e)),
    };
    let (mut write, mut read) = ws_stream.split();

    // Commands queued against the previous socket are stale now
    let mut dropped = 0;
    while outbound_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!("Dropped {} command(s) queued before reconnect", dropped);
    }

    // Resync before anything else
    let query = match serde_json::to_string(&Command::Query) {
        Ok(json) => json,
        Err(e) => return ClientError::Serialization(e),
    };
    if let Err(e) = write.send(Message::Text(query)).await {
        return ClientError::Transport(format!("send query: {}", e));
    }

    info!("Connected to timer server at {}", url);
    *attempt = 0;
    status.send_replace(ConnectionStatus::Connected);

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // Skip the first immediate tick.
    ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Event>(&text) {
                            Ok(event) => {
                                debug!("Received {} event", event.name());
                                // No subscribers is fine; the surface may not be listening yet
                                let _ = events.send(event);
                            }
                            Err(e) => debug!("Ignoring unparseable server message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return ClientError::Transport("connection closed by server".into());
                    }
                    Some(Err(e)) => return ClientError::Transport(format!("read error: {}", e)),
                    _ => {}
                }
            }
            Some(json) = outbound_rx.recv() => {
                if let Err(e) = write.send(Message::Text(json)).await {
                    return ClientError::Transport(format!("send error: {}", e));
                }
            }
            _ = ping_interval.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return ClientError::Transport(format!("ping error: {}", e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_maps_http_and_encodes_user() {
        let url = SyncClient::endpoint("http://localhost:20554", "alice").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:20554/users/alice/ws");

        let url = SyncClient::endpoint("https://timer.example.com/api/", "a b").unwrap();
        assert_eq!(url.as_str(), "wss://timer.example.com/api/users/a%20b/ws");

        assert!(SyncClient::endpoint("ftp://x", "a").is_err());
        assert!(SyncClient::endpoint("not a url", "a").is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn first_retry_waits_the_base_delay() {
        assert_eq!(reconnect_step(0), (Duration::from_secs(1), 1));
        assert_eq!(reconnect_step(1), (Duration::from_secs(2), 2));
        assert_eq!(reconnect_step(8).0, MAX_RECONNECT_DELAY);
    }

    #[tokio::test]
    async fn commands_are_refused_before_connecting() {
        // Nothing listens on port 9 (discard); the client never gets connected
        let client = SyncClient::connect("ws://127.0.0.1:9", "u").unwrap();
        assert!(matches!(client.pause(), Err(ClientError::Disconnected)));
        assert!(client
            .wait_connected(Duration::from_millis(50))
            .await
            .is_err());
    }
}
