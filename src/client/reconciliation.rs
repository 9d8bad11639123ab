//! Client-side countdown that re-derives remaining time on every tick
//!
//! Nothing here decrements a counter. The timer keeps an absolute end time
//! (or a frozen remainder while paused) and recomputes from the clock, so a
//! suspended process shows the right value the moment it wakes up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::{clock::minutes_to_millis, ClientTimerState};

/// Tick period of the local countdown
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running { end_time: i64 },
    Paused { remaining: u64 },
    Completed,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Running { remaining: u64 },
    Paused { remaining: u64 },
    /// Zero was reached on this tick; reported once per instance
    ZeroCrossing,
    /// Already completed earlier
    Finished,
}

/// What every presentation surface renders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub time_left_ms: u64,
    pub is_running: bool,
    pub task_title: String,
    pub subtask_title: String,
    pub completed: bool,
}

/// Per-surface countdown keyed by subtask identity
#[derive(Debug, Clone)]
pub struct ReconciliationTimer {
    key: Option<String>,
    instance: Option<u64>,
    /// Newest server instance ever tracked
    newest: Option<u64>,
    /// Server instances at or below this belong to replaced timers
    stale_through: Option<u64>,
    /// Bumped on every new local instance; keys the completion guard
    generation: u64,
    duration_ms: u64,
    phase: Phase,
}

impl Default for ReconciliationTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationTimer {
    pub fn new() -> Self {
        Self {
            key: None,
            instance: None,
            newest: None,
            stale_through: None,
            generation: 0,
            duration_ms: 0,
            phase: Phase::Idle,
        }
    }

    /// Identity key (subtask id) of the current instance
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Server instance the countdown is tracking, once known
    pub fn instance(&self) -> Option<u64> {
        self.instance
    }

    /// Local instance counter; changes whenever a different timer is tracked
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `instance` names a timer this one has already moved past
    pub fn is_stale(&self, instance: u64) -> bool {
        self.stale_through.is_some_and(|through| instance <= through)
            || self.instance.is_some_and(|current| instance < current)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Hard reset to a new instance, ready but not running.
    ///
    /// Clears the completed guard. Invalid durations leave the timer idle.
    pub fn reset(&mut self, key: &str, duration_minutes: f64) {
        self.key = Some(key.to_string());
        // The server will number this start above anything seen so far
        self.stale_through = self.stale_through.max(self.newest);
        self.instance = None;
        self.generation = self.generation.wrapping_add(1);
        match minutes_to_millis(duration_minutes) {
            Some(duration_ms) => {
                self.duration_ms = duration_ms;
                self.phase = Phase::Paused { remaining: duration_ms };
            }
            None => {
                self.duration_ms = 0;
                self.phase = Phase::Idle;
            }
        }
    }

    /// Start or resume: fresh end time from whatever remains
    pub fn start(&mut self, now: i64) -> bool {
        let Phase::Paused { remaining } = self.phase else {
            return false;
        };
        self.phase = Phase::Running {
            end_time: now.saturating_add(i64::try_from(remaining).unwrap_or(i64::MAX)),
        };
        true
    }

    /// Freeze the remaining time
    pub fn pause(&mut self, now: i64) -> bool {
        let Phase::Running { end_time } = self.phase else {
            return false;
        };
        let remaining = u64::try_from(end_time.saturating_sub(now)).unwrap_or(0);
        if remaining == 0 {
            // Too late to pause; the next tick completes it
            return false;
        }
        self.phase = Phase::Paused { remaining };
        true
    }

    /// Drop the countdown without completing it
    pub fn clear(&mut self) {
        self.key = None;
        self.instance = None;
        self.duration_ms = 0;
        self.phase = Phase::Idle;
    }

    /// Completion confirmed elsewhere; stop counting
    pub fn mark_completed(&mut self) {
        if self.phase != Phase::Idle {
            self.phase = Phase::Completed;
        }
    }

    /// Remaining time at `now`
    pub fn remaining(&self, now: i64) -> u64 {
        match self.phase {
            Phase::Idle | Phase::Completed => 0,
            Phase::Paused { remaining } => remaining,
            Phase::Running { end_time } => u64::try_from(end_time.saturating_sub(now)).unwrap_or(0),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Recompute from the clock and detect the zero crossing
    pub fn tick(&mut self, now: i64) -> TickOutcome {
        match self.phase {
            Phase::Idle => TickOutcome::Idle,
            Phase::Completed => TickOutcome::Finished,
            Phase::Paused { remaining } => TickOutcome::Paused { remaining },
            Phase::Running { .. } => match self.remaining(now) {
                0 => {
                    self.phase = Phase::Completed;
                    TickOutcome::ZeroCrossing
                }
                remaining => TickOutcome::Running { remaining },
            },
        }
    }

    /// Adopt an authoritative copy from the server.
    ///
    /// A different subtask or server instance is a new timer and hard-resets
    /// the countdown. The echo of our own optimistic start only attaches the
    /// instance id. The window is re-anchored on the local clock from
    /// `time_left`, so skew between the two machines' clocks never leaks in.
    /// A locally completed instance stays completed. State for a replaced
    /// instance is ignored and `false` returned.
    pub fn adopt(&mut self, timer: &ClientTimerState, now: i64) -> bool {
        if self.is_stale(timer.instance) {
            return false;
        }
        let same_key = self.key.as_deref() == Some(timer.subtask_id.as_str());
        let same_instance = self.instance.map_or(true, |id| id == timer.instance);
        if !(same_key && same_instance) {
            self.key = Some(timer.subtask_id.clone());
            self.phase = Phase::Idle;
            self.generation = self.generation.wrapping_add(1);
        }
        self.instance = Some(timer.instance);
        self.newest = self.newest.max(Some(timer.instance));
        self.duration_ms = timer.duration_ms;

        if self.phase == Phase::Completed {
            return true;
        }
        self.phase = if timer.is_paused {
            Phase::Paused { remaining: timer.time_left }
        } else {
            let span = i64::try_from(timer.time_left).unwrap_or(i64::MAX);
            Phase::Running { end_time: now.saturating_add(span) }
        };
        true
    }

    /// Derive the renderable view
    pub fn view(&self, now: i64, task_title: &str, subtask_title: &str) -> TimerView {
        TimerView {
            time_left_ms: self.remaining(now),
            is_running: self.is_running(),
            task_title: task_title.to_string(),
            subtask_title: subtask_title.to_string(),
            completed: self.is_completed(),
        }
    }
}
