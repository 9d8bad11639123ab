//! Wire messages exchanged over a surface connection
//!
//! Frames are JSON text, internally tagged by `type` with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::state::ClientTimerState;

/// Payload of a `start` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCommand {
    pub task_id: String,
    pub subtask_id: String,
    pub duration_minutes: f64,
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Start(StartCommand),
    Pause,
    Resume,
    Stop,
    Query,
}

impl Command {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start(_) => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::Query => "query",
        }
    }
}

/// Server to client.
///
/// `State`, `Stopped` and `Completed` are broadcast to every surface of the
/// user. `Snapshot` and `Error` only go back to the connection that caused them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    State {
        timer: ClientTimerState,
    },
    Stopped,
    #[serde(rename_all = "camelCase")]
    Completed {
        task_id: String,
        subtask_id: String,
        instance: u64,
    },
    /// Answer to `query`; `None` means no timer exists
    Snapshot {
        timer: Option<ClientTimerState>,
    },
    Error {
        message: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::State { .. } => "state",
            Event::Stopped => "stopped",
            Event::Completed { .. } => "completed",
            Event::Snapshot { .. } => "snapshot",
            Event::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_client_frames() {
        let start: Command = serde_json::from_str(
            r#"{"type":"start","taskId":"t1","subtaskId":"s1","durationMinutes":25}"#,
        )
        .unwrap();
        assert_eq!(
            start,
            Command::Start(StartCommand {
                task_id: "t1".into(),
                subtask_id: "s1".into(),
                duration_minutes: 25.0,
            })
        );
        let pause: Command = serde_json::from_str(r#"{"type":"pause"}"#).unwrap();
        assert_eq!(pause, Command::Pause);
        assert!(serde_json::from_str::<Command>(r#"{"type":"rewind"}"#).is_err());
    }

    #[test]
    fn empty_snapshot_is_null_not_zero() {
        let json = serde_json::to_string(&Event::Snapshot { timer: None }).unwrap();
        assert_eq!(json, r#"{"type":"snapshot","timer":null}"#);
    }

    #[test]
    fn completed_event_carries_ids() {
        let event = Event::Completed {
            task_id: "t".into(),
            subtask_id: "s".into(),
            instance: 7,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["taskId"], "t");
        assert_eq!(json["subtaskId"], "s");
        assert_eq!(json["instance"], 7);
    }
}
