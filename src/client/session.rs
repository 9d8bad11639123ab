//! Client session: protocol events in, local countdown, completion out
//!
//! The session owns the surface's [`ReconciliationTimer`] and feeds both
//! completion producers (local zero crossing, remote `completed`) into one
//! [`CompletionPipeline`]. Surfaces only ever see the published [`TimerView`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::{
    sync::{broadcast, broadcast::error::RecvError, watch},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, warn};

use super::{
    completion::{CompletionOutcome, CompletionPipeline, CompletionSource},
    connection::SyncClient,
    reconciliation::{ReconciliationTimer, TickOutcome, TimerView, TICK_INTERVAL},
};
use crate::{
    error::ClientError,
    protocol::{Command, Event, StartCommand},
    state::{Clock, ClientTimerState},
};

/// Anything that can carry a command to the server
pub trait CommandSink: Send + Sync {
    fn send_command(&self, command: &Command) -> Result<(), ClientError>;
}

impl CommandSink for SyncClient {
    fn send_command(&self, command: &Command) -> Result<(), ClientError> {
        self.send(command)
    }
}

/// Read-only title lookup provided by the task service
pub trait TitleSource: Send + Sync {
    fn task_title(&self, task_id: &str) -> Option<String>;
    fn subtask_title(&self, subtask_id: &str) -> Option<String>;
}

/// Title lookup backed by a fixed map from id to title
#[derive(Debug, Default, Clone)]
pub struct StaticTitles {
    titles: HashMap<String, String>,
}

impl StaticTitles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, title: &str) -> Self {
        self.titles.insert(id.to_string(), title.to_string());
        self
    }
}

impl TitleSource for StaticTitles {
    fn task_title(&self, task_id: &str) -> Option<String> {
        self.titles.get(task_id).cloned()
    }

    fn subtask_title(&self, subtask_id: &str) -> Option<String> {
        self.titles.get(subtask_id).cloned()
    }
}

#[derive(Debug, Default)]
struct Inner {
    timer: ReconciliationTimer,
    task_title: String,
    subtask_title: String,
}

impl Inner {
    /// Completion guard key: subtask plus local instance generation
    fn guard_key(&self) -> String {
        format!(
            "{}#{}",
            self.timer.key().unwrap_or_default(),
            self.timer.generation()
        )
    }
}

/// One surface's view of the user's timer
pub struct FocusSession {
    clock: Arc<dyn Clock>,
    titles: Arc<dyn TitleSource>,
    pipeline: CompletionPipeline,
    inner: Mutex<Inner>,
    view_tx: watch::Sender<TimerView>,
}

impl FocusSession {
    pub fn new(
        clock: Arc<dyn Clock>,
        titles: Arc<dyn TitleSource>,
        pipeline: CompletionPipeline,
    ) -> Self {
        let (view_tx, _) = watch::channel(TimerView::default());
        Self {
            clock,
            titles,
            pipeline,
            inner: Mutex::new(Inner::default()),
            view_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Subscribe to the derived view
    pub fn view(&self) -> watch::Receiver<TimerView> {
        self.view_tx.subscribe()
    }

    /// Latest published view
    pub fn current_view(&self) -> TimerView {
        self.view_tx.borrow().clone()
    }

    fn publish(&self, inner: &Inner, now: i64) {
        let view = inner
            .timer
            .view(now, &inner.task_title, &inner.subtask_title);
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn resolve_titles(&self, inner: &mut Inner, task_id: &str, subtask_id: &str) {
        inner.task_title = self
            .titles
            .task_title(task_id)
            .unwrap_or_else(|| task_id.to_string());
        inner.subtask_title = self
            .titles
            .subtask_title(subtask_id)
            .unwrap_or_else(|| subtask_id.to_string());
    }

    /// Start (or explicitly restart) a focus block, optimistically.
    ///
    /// Nothing changes locally if the command cannot be sent.
    pub fn start(
        &self,
        sink: &dyn CommandSink,
        task_id: &str,
        subtask_id: &str,
        duration_minutes: f64,
    ) -> Result<(), ClientError> {
        let command = Command::Start(StartCommand {
            task_id: task_id.to_string(),
            subtask_id: subtask_id.to_string(),
            duration_minutes,
        });
        if crate::state::clock::minutes_to_millis(duration_minutes).is_none() {
            return Err(ClientError::InvalidCommand(format!(
                "durationMinutes must be a positive number, got {}",
                duration_minutes
            )));
        }
        sink.send_command(&command)?;

        let now = self.clock.now_millis();
        let mut inner = self.lock();
        inner.timer.reset(subtask_id, duration_minutes);
        inner.timer.start(now);
        self.resolve_titles(&mut inner, task_id, subtask_id);
        self.pipeline.arm(&inner.guard_key());
        self.publish(&inner, now);
        Ok(())
    }

    pub fn pause(&self, sink: &dyn CommandSink) -> Result<(), ClientError> {
        sink.send_command(&Command::Pause)?;
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        inner.timer.pause(now);
        self.publish(&inner, now);
        Ok(())
    }

    pub fn resume(&self, sink: &dyn CommandSink) -> Result<(), ClientError> {
        sink.send_command(&Command::Resume)?;
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        inner.timer.start(now);
        self.publish(&inner, now);
        Ok(())
    }

    pub fn stop(&self, sink: &dyn CommandSink) -> Result<(), ClientError> {
        sink.send_command(&Command::Stop)?;
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        inner.timer.clear();
        self.pipeline.disarm();
        self.publish(&inner, now);
        Ok(())
    }

    /// The overlay process flipped its own running toggle
    pub fn overlay_toggled(&self, sink: &dyn CommandSink, is_running: bool) -> Result<(), ClientError> {
        let running_now = self.lock().timer.is_running();
        match (is_running, running_now) {
            (true, false) => self.resume(sink),
            (false, true) => self.pause(sink),
            _ => Ok(()),
        }
    }

    /// Apply one server event
    pub fn handle_event(&self, event: &Event) {
        let now = self.clock.now_millis();
        match event {
            Event::State { timer } | Event::Snapshot { timer: Some(timer) } => {
                self.adopt(timer, now);
            }
            Event::Stopped | Event::Snapshot { timer: None } => {
                let mut inner = self.lock();
                if !inner.timer.is_idle() && !inner.timer.is_completed() {
                    debug!("Server reports no timer, clearing local countdown");
                }
                // A completed countdown stays on the break screen until a new start
                if !inner.timer.is_completed() {
                    inner.timer.clear();
                    self.pipeline.disarm();
                }
                self.publish(&inner, now);
            }
            Event::Completed { subtask_id, instance, .. } => {
                let mut inner = self.lock();
                let tracked = inner.timer.key() == Some(subtask_id.as_str())
                    && !inner.timer.is_stale(*instance)
                    && inner.timer.instance().map_or(true, |id| id == *instance);
                if !tracked {
                    debug!("Ignoring completion of untracked instance {}", instance);
                    return;
                }
                inner.timer.mark_completed();
                let title = inner.subtask_title.clone();
                let key = inner.guard_key();
                self.publish(&inner, now);
                drop(inner);
                self.fire(&key, CompletionSource::RemoteCompleted, &title);
            }
            Event::Error { message } => warn!("Timer server rejected a command: {}", message),
        }
    }

    fn adopt(&self, timer: &ClientTimerState, now: i64) {
        let mut inner = self.lock();
        let before = inner.timer.generation();
        if !inner.timer.adopt(timer, now) {
            debug!("Ignoring state of replaced instance {}", timer.instance);
            return;
        }

        if inner.timer.generation() != before {
            debug!("Tracking timer instance {} ({})", timer.instance, timer.subtask_id);
            self.resolve_titles(&mut inner, &timer.task_id, &timer.subtask_id);
            self.pipeline.arm(&inner.guard_key());
        }
        self.publish(&inner, now);
    }

    /// One reconciliation tick: recompute and fire on the zero crossing
    pub fn tick(&self) -> TickOutcome {
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        let outcome = inner.timer.tick(now);
        self.publish(&inner, now);

        if outcome == TickOutcome::ZeroCrossing {
            let key = inner.guard_key();
            let title = inner.subtask_title.clone();
            drop(inner);
            self.fire(&key, CompletionSource::LocalZeroCrossing, &title);
        }
        outcome
    }

    fn fire(&self, key: &str, source: CompletionSource, title: &str) {
        match self.pipeline.trigger(key, source, title) {
            CompletionOutcome::Fired => debug!("Completion effects ran for {}", key),
            outcome => debug!("Completion trigger {:?} for {}: {:?}", source, key, outcome),
        }
    }
}

/// Drive a session: tick every 100ms and apply server events as they come.
///
/// Ticks never touch the network; a lagging event stream asks `resync` for
/// a fresh `query` instead of trusting what it has.
pub fn spawn_driver(
    session: Arc<FocusSession>,
    mut events: broadcast::Receiver<Event>,
    resync: Arc<dyn CommandSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    session.tick();
                }
                event = events.recv() => match event {
                    Ok(event) => session.handle_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} timer events, requesting a fresh snapshot", skipped);
                        if let Err(e) = resync.send_command(&Command::Query) {
                            debug!("Resync deferred until reconnect: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}
