//! Protocol client behaviour across a dropped connection

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::AbortHandle,
};

use focus_sync::{
    api::create_router,
    client::{ConnectionStatus, SyncClient},
    error::ClientError,
    protocol::Event,
    state::{AppState, ClientTimerState, ManualClock},
};

type Links = Arc<Mutex<Vec<AbortHandle>>>;

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let state = Arc::new(AppState::new(0, "127.0.0.1".to_string(), clock, 64));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// TCP relay in front of the server whose live links can be cut
async fn spawn_relay(upstream: SocketAddr) -> (SocketAddr, Links) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let links: Links = Arc::default();
    let registry = links.clone();
    tokio::spawn(async move {
        while let Ok((mut inbound, _)) = listener.accept().await {
            let link = tokio::spawn(async move {
                if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                }
            });
            registry.lock().unwrap().push(link.abort_handle());
        }
    });
    (addr, links)
}

fn cut(links: &Links) {
    for link in links.lock().unwrap().drain(..) {
        link.abort();
    }
}

async fn next_snapshot(events: &mut broadcast::Receiver<Event>) -> Option<ClientTimerState> {
    let wait = async {
        loop {
            if let Event::Snapshot { timer } = events.recv().await.unwrap() {
                return timer;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no snapshot within 5s")
}

async fn next_state(events: &mut broadcast::Receiver<Event>) -> ClientTimerState {
    let wait = async {
        loop {
            if let Event::State { timer } = events.recv().await.unwrap() {
                return timer;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no state within 5s")
}

#[tokio::test]
async fn reconnect_resyncs_with_a_fresh_query() {
    let (server, state) = spawn_server().await;
    let (relay, links) = spawn_relay(server).await;

    let client = SyncClient::connect(&format!("ws://{}", relay), "alice").unwrap();
    let mut events = client.subscribe();
    client.wait_connected(Duration::from_secs(5)).await.unwrap();

    // Every connect opens with a query
    assert_eq!(next_snapshot(&mut events).await, None);

    client.start("task-1", "sub-1", 25.0).unwrap();
    let started = next_state(&mut events).await;
    assert!(!started.is_paused);

    cut(&links);
    let mut status = client.status_watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| matches!(s, ConnectionStatus::Reconnecting { .. })),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(client.status(), ConnectionStatus::Reconnecting { attempt: 1 });

    // Commands are refused while the socket is down
    assert!(matches!(client.pause(), Err(ClientError::Disconnected)));

    // Another surface changed the timer during the gap
    state.store.pause("alice").unwrap().unwrap();

    client.wait_connected(Duration::from_secs(5)).await.unwrap();
    let resynced = next_snapshot(&mut events).await.expect("timer survives the gap");
    assert_eq!(resynced.instance, started.instance);
    assert!(resynced.is_paused);

    client.resume().unwrap();
    assert!(!next_state(&mut events).await.is_paused);
}
