//! Focus Client - command line surface for the focus-sync server
//!
//! One-shot commands print the server's answer as JSON. `watch` keeps a
//! live countdown widget on stdout until interrupted.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use focus_sync::{
    client::{spawn_driver, CommandSink, CompletionPipeline, FocusSession, LogEffects, StaticTitles, SyncClient},
    protocol::{Command, Event, StartCommand},
    state::SystemClock,
    surfaces::{
        open_surface,
        overlay::{InstallerPrompt, Platform, OVERLAY_SCHEME},
        OverlayLaunch, WidgetSurface,
    },
    utils::shutdown_signal,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "focus-client")]
#[command(about = "Drive and watch a focus timer on a focus-sync server")]
#[command(version)]
struct Cli {
    /// Server base URL
    #[arg(long, default_value = "ws://127.0.0.1:20554")]
    server: String,

    /// User whose timer to control
    #[arg(short, long, default_value = "me")]
    user: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Start (or replace) the focus timer
    Start {
        #[arg(long)]
        task: String,
        #[arg(long)]
        subtask: String,
        /// Duration in minutes; fractions allowed
        #[arg(long, default_value = "25")]
        minutes: f64,
    },
    /// Pause the running timer
    Pause,
    /// Resume the paused timer
    Resume,
    /// Stop the timer without completing it
    Stop,
    /// Print the current timer
    Query,
    /// Show a live countdown until interrupted
    Watch {
        /// Display title for an id, as `id=Title`; repeatable
        #[arg(long = "title", value_parser = parse_title)]
        titles: Vec<(String, String)>,
    },
    /// Print the overlay handoff URL for a timer
    OverlayUrl {
        #[arg(long, default_value = "")]
        task: String,
        #[arg(long, default_value = "")]
        subtask: String,
        #[arg(long, default_value = "25")]
        minutes: f64,
        #[arg(long)]
        autostart: bool,
        /// Also print the installer fallback for this platform
        #[arg(long)]
        installer: bool,
    },
}

fn parse_title(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(id, title)| (id.to_string(), title.to_string()))
        .ok_or_else(|| format!("expected id=Title, got {}", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("focus_sync={},focus_client={}", level, level))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Action::OverlayUrl { task, subtask, minutes, autostart, installer } => {
            if !(minutes.is_finite() && minutes > 0.0) {
                bail!("minutes must be a positive number");
            }
            let launch = OverlayLaunch {
                task,
                subtask,
                duration_secs: (minutes * 60.0).round().max(1.0) as u64,
                autostart,
            };
            println!("{}", launch.to_url(OVERLAY_SCHEME)?);
            if installer {
                let prompt = InstallerPrompt::for_platform(Platform::current());
                println!("{}", serde_json::to_string(&prompt)?);
            }
            Ok(())
        }
        Action::Watch { titles } => watch(&cli.server, &cli.user, titles).await,
        Action::Query => {
            let client = connect(&cli.server, &cli.user).await?;
            let mut events = client.subscribe();
            client.query()?;
            print_reply(&mut events, |event| matches!(event, Event::Snapshot { .. })).await
        }
        action => {
            let command = match action {
                Action::Start { task, subtask, minutes } => Command::Start(StartCommand {
                    task_id: task,
                    subtask_id: subtask,
                    duration_minutes: minutes,
                }),
                Action::Pause => Command::Pause,
                Action::Resume => Command::Resume,
                _ => Command::Stop,
            };
            let client = connect(&cli.server, &cli.user).await?;
            let mut events = client.subscribe();
            client.send(&command)?;
            // The reconnect query's snapshot is not an answer to this command
            print_reply(&mut events, |event| !matches!(event, Event::Snapshot { .. })).await
        }
    }
}

async fn connect(server: &str, user: &str) -> anyhow::Result<SyncClient> {
    let client = SyncClient::connect(server, user)?;
    client
        .wait_connected(CONNECT_TIMEOUT)
        .await
        .with_context(|| format!("could not reach {}", client.endpoint_url()))?;
    Ok(client)
}

async fn print_reply(
    events: &mut broadcast::Receiver<Event>,
    wanted: impl Fn(&Event) -> bool,
) -> anyhow::Result<()> {
    let reply = tokio::time::timeout(REPLY_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return Some(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await;

    match reply {
        Ok(Some(Event::Error { message })) => bail!("server rejected the command: {}", message),
        Ok(Some(event)) => {
            println!("{}", serde_json::to_string_pretty(&event)?);
            Ok(())
        }
        Ok(None) => bail!("connection closed before the server answered"),
        // Pausing a paused timer and similar no-ops are not broadcast
        Err(_) => {
            println!("no change");
            Ok(())
        }
    }
}

async fn watch(server: &str, user: &str, titles: Vec<(String, String)>) -> anyhow::Result<()> {
    let client = Arc::new(SyncClient::connect(server, user)?);
    let titles = titles
        .iter()
        .fold(StaticTitles::new(), |acc, (id, title)| acc.with(id, title));
    let session = Arc::new(FocusSession::new(
        Arc::new(SystemClock),
        Arc::new(titles),
        CompletionPipeline::new(Arc::new(LogEffects)),
    ));

    let sink: Arc<dyn CommandSink> = client.clone();
    let driver = spawn_driver(session.clone(), client.subscribe(), sink);
    let widget = open_surface(WidgetSurface::stdout(), session.view());
    info!("Watching timer for {} at {}", user, client.endpoint_url());

    if client.wait_connected(CONNECT_TIMEOUT).await.is_err() {
        warn!("Server not reachable yet; retrying in the background");
    }

    let mut views = session.view();
    tokio::select! {
        _ = shutdown_signal() => {}
        done = views.wait_for(|view| view.completed) => {
            if done.is_ok() {
                info!("Focus block finished");
            }
        }
    }
    widget.close().await;
    driver.abort();
    Ok(())
}
