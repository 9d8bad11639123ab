//! Authoritative per-user timer store
//!
//! Every mutation for a user happens while that user's slot is held, and the
//! resulting event is broadcast before the slot is released. Event order seen
//! by subscribers therefore always matches mutation order.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{
    clock::{minutes_to_millis, Clock},
    ClientTimerState, TimerState,
};
use crate::{
    error::{Result, SyncError},
    protocol::{Command, Event, StartCommand},
};

/// Opaque stable user identifier supplied by the auth layer
pub type UserId = String;

/// A timer that crossed zero and was removed by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTimer {
    pub user_id: UserId,
    pub task_id: String,
    pub subtask_id: String,
    pub instance: u64,
}

#[derive(Debug)]
struct UserSlot {
    timer: Option<TimerState>,
    events: broadcast::Sender<Event>,
}

impl UserSlot {
    fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { timer: None, events }
    }

    fn broadcast(&self, user_id: &str, event: Event) {
        let name = event.name();
        match self.events.send(event) {
            Ok(receivers) => debug!("Broadcast {} to {} surface(s) of {}", name, receivers, user_id),
            Err(_) => debug!("No surfaces connected for {}, {} not delivered", user_id, name),
        }
    }

    /// Complete the timer if its window has closed. Returns the completion, if any.
    fn settle(&mut self, user_id: &str, now: i64) -> Option<CompletedTimer> {
        if !self.timer.as_ref().is_some_and(|t| t.is_expired(now)) {
            return None;
        }
        let timer = self.timer.take()?;
        info!(
            "Timer {} for {} completed (task={}, subtask={})",
            timer.instance, user_id, timer.task_id, timer.subtask_id
        );
        self.broadcast(
            user_id,
            Event::Completed {
                task_id: timer.task_id.clone(),
                subtask_id: timer.subtask_id.clone(),
                instance: timer.instance,
            },
        );
        Some(CompletedTimer {
            user_id: user_id.to_string(),
            task_id: timer.task_id,
            subtask_id: timer.subtask_id,
            instance: timer.instance,
        })
    }
}

/// Server-owned store holding exactly one timer per user
#[derive(Debug)]
pub struct TimerStore {
    clock: Arc<dyn Clock>,
    users: Mutex<HashMap<UserId, UserSlot>>,
    next_instance: AtomicU64,
    channel_capacity: usize,
}

impl TimerStore {
    /// Create an empty store. `channel_capacity` bounds each user's event buffer.
    ///
    /// Instance ids start at the current epoch millisecond, so ids handed out
    /// after a restart stay above the ones clients saw before it.
    pub fn new(clock: Arc<dyn Clock>, channel_capacity: usize) -> Self {
        let first_instance = u64::try_from(clock.now_millis()).unwrap_or(0).max(1);
        Self {
            clock,
            users: Mutex::new(HashMap::new()),
            next_instance: AtomicU64::new(first_instance),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<UserId, UserSlot>>> {
        self.users
            .lock()
            .map_err(|e| SyncError::StoreUnavailable(format!("Failed to lock timer store: {}", e)))
    }

    /// Subscribe to every event for `user_id`
    pub fn subscribe(&self, user_id: &str) -> Result<broadcast::Receiver<Event>> {
        let mut users = self.lock()?;
        let slot = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserSlot::new(self.channel_capacity));
        Ok(slot.events.subscribe())
    }

    /// Replace whatever timer the user had with a fresh running one
    pub fn start(&self, user_id: &str, command: StartCommand) -> Result<ClientTimerState> {
        let duration_ms = minutes_to_millis(command.duration_minutes).ok_or_else(|| {
            SyncError::InvalidCommand(format!(
                "durationMinutes must be a positive number, got {}",
                command.duration_minutes
            ))
        })?;

        let now = self.now();
        let mut users = self.lock()?;
        let slot = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserSlot::new(self.channel_capacity));
        slot.settle(user_id, now);

        let instance = self.next_instance.fetch_add(1, Ordering::SeqCst);
        let timer = TimerState::running(
            command.task_id,
            command.subtask_id,
            instance,
            now,
            duration_ms,
        );
        if let Some(previous) = slot.timer.as_ref() {
            info!(
                "Replacing timer {} for {} with {}",
                previous.instance, user_id, instance
            );
        }
        info!(
            "Starting timer {} for {}: task={}, subtask={}, {}ms",
            instance, user_id, timer.task_id, timer.subtask_id, duration_ms
        );

        let view = timer.to_client(now);
        slot.timer = Some(timer);
        slot.broadcast(user_id, Event::State { timer: view.clone() });
        Ok(view)
    }

    /// Freeze a running timer. `None` when there was nothing to pause.
    pub fn pause(&self, user_id: &str) -> Result<Option<ClientTimerState>> {
        self.mutate(user_id, "pause", |timer, now| timer.pause(now))
    }

    /// Restart a paused timer from its frozen remainder. `None` when not paused.
    pub fn resume(&self, user_id: &str) -> Result<Option<ClientTimerState>> {
        self.mutate(user_id, "resume", |timer, now| timer.resume(now))
    }

    fn mutate<F>(&self, user_id: &str, action: &str, apply: F) -> Result<Option<ClientTimerState>>
    where
        F: FnOnce(&mut TimerState, i64) -> bool,
    {
        let now = self.now();
        let mut users = self.lock()?;
        let Some(slot) = users.get_mut(user_id) else {
            debug!("Ignoring {} for {}: no timer", action, user_id);
            return Ok(None);
        };
        slot.settle(user_id, now);

        let Some(timer) = slot.timer.as_mut() else {
            debug!("Ignoring {} for {}: no timer", action, user_id);
            return Ok(None);
        };
        if !apply(timer, now) {
            debug!("Ignoring {} for {}: timer {} unchanged", action, user_id, timer.instance);
            return Ok(None);
        }

        let view = timer.to_client(now);
        info!(
            "Timer {} for {} {}d with {}ms left",
            view.instance, user_id, action, view.time_left
        );
        slot.broadcast(user_id, Event::State { timer: view.clone() });
        Ok(Some(view))
    }

    /// Remove the user's timer. Returns false when there was none.
    pub fn stop(&self, user_id: &str) -> Result<bool> {
        let now = self.now();
        let mut users = self.lock()?;
        let Some(slot) = users.get_mut(user_id) else {
            return Ok(false);
        };
        slot.settle(user_id, now);

        match slot.timer.take() {
            Some(timer) => {
                info!("Stopped timer {} for {}", timer.instance, user_id);
                slot.broadcast(user_id, Event::Stopped);
                Ok(true)
            }
            None => {
                debug!("Ignoring stop for {}: no timer", user_id);
                Ok(false)
            }
        }
    }

    /// Current derived view, without side effects
    pub fn query(&self, user_id: &str) -> Result<Option<ClientTimerState>> {
        let now = self.now();
        let users = self.lock()?;
        Ok(users
            .get(user_id)
            .and_then(|slot| slot.timer.as_ref())
            .filter(|timer| !timer.is_expired(now))
            .map(|timer| timer.to_client(now)))
    }

    /// Apply a protocol command. Returns the direct reply for the issuer, if any.
    pub fn apply(&self, user_id: &str, command: Command) -> Result<Option<Event>> {
        match command {
            Command::Start(start) => self.start(user_id, start).map(|_| None),
            Command::Pause => self.pause(user_id).map(|_| None),
            Command::Resume => self.resume(user_id).map(|_| None),
            Command::Stop => self.stop(user_id).map(|_| None),
            Command::Query => self
                .query(user_id)
                .map(|timer| Some(Event::Snapshot { timer })),
        }
    }

    /// Complete every running timer whose window has closed.
    ///
    /// Completion removes the timer under the lock, so each instance is
    /// reported at most once however often this runs. Users with no timer and
    /// no connected surfaces are dropped.
    pub fn reap_expired(&self) -> Result<Vec<CompletedTimer>> {
        let now = self.now();
        let mut users = self.lock()?;
        let mut completed = Vec::new();
        for (user_id, slot) in users.iter_mut() {
            if let Some(done) = slot.settle(user_id, now) {
                completed.push(done);
            }
        }
        users.retain(|_, slot| slot.timer.is_some() || slot.events.receiver_count() > 0);
        Ok(completed)
    }

    /// Earliest end time among running timers
    pub fn next_deadline(&self) -> Result<Option<i64>> {
        let users = self.lock()?;
        Ok(users
            .values()
            .filter_map(|slot| slot.timer.as_ref())
            .filter(|timer| !timer.is_paused)
            .map(|timer| timer.end_time)
            .min())
    }

    /// Number of users with a timer, running or paused
    pub fn active_timers(&self) -> Result<usize> {
        let users = self.lock()?;
        Ok(users.values().filter(|slot| slot.timer.is_some()).count())
    }

    /// Number of subscribed surfaces across all users
    pub fn connected_surfaces(&self) -> Result<usize> {
        let users = self.lock()?;
        Ok(users.values().map(|slot| slot.events.receiver_count()).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::clock::ManualClock;

    const USER: &str = "user-1";

    fn store() -> (Arc<ManualClock>, TimerStore) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = TimerStore::new(clock.clone(), 16);
        (clock, store)
    }

    fn start_cmd(task: &str, subtask: &str, minutes: f64) -> StartCommand {
        StartCommand {
            task_id: task.into(),
            subtask_id: subtask.into(),
            duration_minutes: minutes,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn start_broadcasts_state_with_full_window() {
        let (clock, store) = store();
        let mut rx = store.subscribe(USER).unwrap();
        let view = store.start(USER, start_cmd("t", "s", 25.0)).unwrap();

        assert_eq!(view.start_time, clock.now_millis());
        assert_eq!(view.end_time - view.start_time, 25 * 60_000);
        assert!(!view.is_paused);
        assert_eq!(drain(&mut rx), vec![Event::State { timer: view }]);
    }

    #[test]
    fn invalid_duration_is_rejected_without_events() {
        let (_, store) = store();
        let mut rx = store.subscribe(USER).unwrap();
        let err = store.start(USER, start_cmd("t", "s", 0.0)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidCommand(_)));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(store.query(USER).unwrap(), None);
    }

    #[test]
    fn pause_and_resume_conserve_duration() {
        let (clock, store) = store();
        store.start(USER, start_cmd("t", "s", 10.0)).unwrap();

        clock.advance(2 * 60_000);
        let paused = store.pause(USER).unwrap().unwrap();
        assert!(paused.is_paused);
        assert_eq!(paused.time_left, 480_000);

        clock.advance(37 * 60_000 + 123);
        assert_eq!(store.query(USER).unwrap().unwrap().time_left, 480_000);

        let resumed = store.resume(USER).unwrap().unwrap();
        assert_eq!(resumed.end_time - clock.now_millis(), 480_000);
        assert_eq!(resumed.instance, paused.instance);
    }

    #[test]
    fn pause_and_resume_without_matching_timer_are_silent() {
        let (_, store) = store();
        let mut rx = store.subscribe(USER).unwrap();
        assert_eq!(store.pause(USER).unwrap(), None);
        assert_eq!(store.resume(USER).unwrap(), None);

        store.start(USER, start_cmd("t", "s", 1.0)).unwrap();
        drain(&mut rx);
        assert_eq!(store.resume(USER).unwrap(), None);
        store.pause(USER).unwrap().unwrap();
        assert_eq!(store.pause(USER).unwrap(), None);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn last_start_wins() {
        let (clock, store) = store();
        let mut rx = store.subscribe(USER).unwrap();
        store.start(USER, start_cmd("old-task", "old-sub", 5.0)).unwrap();
        clock.advance(1_000);
        store.start(USER, start_cmd("new-task", "new-sub", 3.0)).unwrap();
        clock.advance(1_000);
        store.pause(USER).unwrap();
        store.resume(USER).unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        for event in &events[1..] {
            let Event::State { timer } = event else {
                panic!("unexpected event {event:?}");
            };
            assert_eq!(timer.task_id, "new-task");
            assert_eq!(timer.subtask_id, "new-sub");
        }
        assert_eq!(store.query(USER).unwrap().unwrap().task_id, "new-task");
    }

    #[test]
    fn stop_is_distinct_from_expired() {
        let (_, store) = store();
        let mut rx = store.subscribe(USER).unwrap();
        store.start(USER, start_cmd("t", "s", 1.0)).unwrap();
        assert!(store.stop(USER).unwrap());
        assert_eq!(store.query(USER).unwrap(), None);

        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&Event::Stopped));
        assert!(!store.stop(USER).unwrap());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn completion_fires_exactly_once() {
        let (clock, store) = store();
        let mut rx = store.subscribe(USER).unwrap();
        let view = store.start(USER, start_cmd("t", "s", 1.0)).unwrap();
        drain(&mut rx);

        clock.advance(59_999);
        assert!(store.reap_expired().unwrap().is_empty());
        clock.advance(1);
        let done = store.reap_expired().unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].instance, view.instance);
        for _ in 0..5 {
            clock.advance(100);
            assert!(store.reap_expired().unwrap().is_empty());
        }

        assert_eq!(
            drain(&mut rx),
            vec![Event::Completed {
                task_id: "t".into(),
                subtask_id: "s".into(),
                instance: view.instance,
            }]
        );
        assert_eq!(store.query(USER).unwrap(), None);
    }

    #[test]
    fn expired_timer_completes_before_late_pause() {
        let (clock, store) = store();
        let mut rx = store.subscribe(USER).unwrap();
        store.start(USER, start_cmd("t", "s", 1.0)).unwrap();
        drain(&mut rx);

        clock.advance(61_000);
        assert_eq!(store.pause(USER).unwrap(), None);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Completed { .. }));
        assert!(store.reap_expired().unwrap().is_empty());
    }

    #[test]
    fn paused_timer_never_completes() {
        let (clock, store) = store();
        store.start(USER, start_cmd("t", "s", 1.0)).unwrap();
        store.pause(USER).unwrap();
        clock.advance(10 * 60_000);
        assert!(store.reap_expired().unwrap().is_empty());
        assert!(store.query(USER).unwrap().is_some());
    }

    #[test]
    fn users_are_isolated() {
        let (_, store) = store();
        let mut other = store.subscribe("user-2").unwrap();
        store.start(USER, start_cmd("t", "s", 1.0)).unwrap();
        assert!(drain(&mut other).is_empty());
        assert_eq!(store.query("user-2").unwrap(), None);
        assert_eq!(store.active_timers().unwrap(), 1);
    }

    #[test]
    fn query_replies_with_snapshot() {
        let (_, store) = store();
        assert_eq!(
            store.apply(USER, Command::Query).unwrap(),
            Some(Event::Snapshot { timer: None })
        );
        store.start(USER, start_cmd("t", "s", 1.0)).unwrap();
        let reply = store.apply(USER, Command::Query).unwrap();
        assert!(matches!(reply, Some(Event::Snapshot { timer: Some(_) })));
        assert_eq!(store.apply(USER, Command::Pause).unwrap(), None);
    }

    #[test]
    fn idle_users_are_pruned() {
        let (clock, store) = store();
        store.start(USER, start_cmd("t", "s", 1.0)).unwrap();
        let rx = store.subscribe("watcher").unwrap();
        clock.advance(60_000);
        store.reap_expired().unwrap();
        assert_eq!(store.active_timers().unwrap(), 0);
        assert_eq!(store.connected_surfaces().unwrap(), 1);
        drop(rx);
        store.reap_expired().unwrap();
        assert_eq!(store.connected_surfaces().unwrap(), 0);
    }

    #[test]
    fn next_deadline_skips_paused_timers() {
        let (clock, store) = store();
        let now = clock.now_millis();
        store.start("a", start_cmd("t", "s", 2.0)).unwrap();
        store.start("b", start_cmd("t", "s", 1.0)).unwrap();
        assert_eq!(store.next_deadline().unwrap(), Some(now + 60_000));
        store.pause("b").unwrap();
        assert_eq!(store.next_deadline().unwrap(), Some(now + 120_000));
    }

    #[test]
    fn instances_keep_growing_across_restarts() {
        let (clock, store) = store();
        let first = store.start(USER, start_cmd("t", "s", 1.0)).unwrap().instance;
        let second = store.start(USER, start_cmd("t", "s", 1.0)).unwrap().instance;
        assert!(second > first);

        clock.advance(5_000);
        let restarted = TimerStore::new(clock.clone(), 16);
        let after = restarted.start(USER, start_cmd("t", "s", 1.0)).unwrap().instance;
        assert!(after > second);
    }
}
