//! Timer state structure and the derived client view

use serde::{Deserialize, Serialize};

use super::clock::remaining_millis;

/// Authoritative countdown for one user.
///
/// Only the store creates and mutates these. Clients only ever see
/// [`ClientTimerState`] copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    pub task_id: String,
    pub subtask_id: String,
    /// Server-assigned identity, stable across pause/resume
    pub instance: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_ms: u64,
    pub is_paused: bool,
    pub paused_remaining_ms: u64,
}

impl TimerState {
    /// Create a running timer whose window is `[now, now + duration_ms]`
    pub fn running(
        task_id: String,
        subtask_id: String,
        instance: u64,
        now: i64,
        duration_ms: u64,
    ) -> Self {
        let span = i64::try_from(duration_ms).unwrap_or(i64::MAX);
        Self {
            task_id,
            subtask_id,
            instance,
            start_time: now,
            end_time: now.saturating_add(span),
            duration_ms,
            is_paused: false,
            paused_remaining_ms: 0,
        }
    }

    /// Remaining time at `now`, frozen while paused
    pub fn time_left(&self, now: i64) -> u64 {
        let frozen = self.is_paused.then_some(self.paused_remaining_ms);
        remaining_millis(self.end_time, frozen, now)
    }

    /// A running timer whose window has closed
    pub fn is_expired(&self, now: i64) -> bool {
        !self.is_paused && self.time_left(now) == 0
    }

    /// Freeze the remaining time. Returns false if already paused.
    pub fn pause(&mut self, now: i64) -> bool {
        if self.is_paused {
            return false;
        }
        self.paused_remaining_ms = self.time_left(now);
        self.is_paused = true;
        true
    }

    /// Open a fresh window from the frozen remainder. Returns false if not paused.
    pub fn resume(&mut self, now: i64) -> bool {
        if !self.is_paused {
            return false;
        }
        let span = i64::try_from(self.paused_remaining_ms).unwrap_or(i64::MAX);
        self.start_time = now;
        self.end_time = now.saturating_add(span);
        self.is_paused = false;
        self.paused_remaining_ms = 0;
        true
    }

    /// Derive the view sent to clients
    pub fn to_client(&self, now: i64) -> ClientTimerState {
        ClientTimerState {
            task_id: self.task_id.clone(),
            subtask_id: self.subtask_id.clone(),
            instance: self.instance,
            start_time: self.start_time,
            end_time: self.end_time,
            is_paused: self.is_paused,
            time_left: self.time_left(now),
            duration_ms: self.duration_ms,
        }
    }
}

/// Disposable, read-only copy of a user's timer as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTimerState {
    pub task_id: String,
    pub subtask_id: String,
    pub instance: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub is_paused: bool,
    /// Milliseconds left when the server produced this copy
    pub time_left: u64,
    pub duration_ms: u64,
}
