//! Playback commands, controller states, events and snapshots.
//!
//! PlaybackCommand is a tagged enum so UI agents can send it as JSON.
//! PlayerSnapshot is what observers read; PlayerEvent is what they subscribe to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Controller state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Command accepted by `Engine::command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlaybackCommand {
    Play,
    Pause,
    TogglePlay {
        #[serde(default)]
        state: Option<bool>,
    },
    Seek { seconds: f64 },
    ToggleRepeat {
        #[serde(default)]
        state: Option<bool>,
    },
}

impl PlaybackCommand {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        serde_json::from_value(v.clone()).ok()
    }
}

/// Outbound notifications. `TrackEnded` is the playlist's cue to advance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    StateChanged { state: PlayerState },
    Looped { track_id: String },
    TrackEnded { track_id: String },
    LoadFailed { track_id: String, error: String },
}

/// Observable state for UI collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlayerSnapshot {
    pub track_id: Option<String>,
    pub state: PlayerState,
    pub position: f64,
    pub duration: f64,
    pub loop_start: f64,
    pub loop_end: f64,
    pub playing: bool,
    pub loading: bool,
    pub repeat: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_json_shape() {
        let v = PlaybackCommand::Seek { seconds: 4.5 }.to_value();
        assert_eq!(v["action"], "seek");
        assert_eq!(v["seconds"], 4.5);
    }

    #[test]
    fn toggle_without_state_parses() {
        let cmd = PlaybackCommand::from_value(&serde_json::json!({"action": "toggle_repeat"}));
        assert_eq!(cmd, Some(PlaybackCommand::ToggleRepeat { state: None }));
    }

    #[test]
    fn unknown_action_rejected() {
        let cmd = PlaybackCommand::from_value(&serde_json::json!({"action": "rewind"}));
        assert!(cmd.is_none());
    }

    #[test]
    fn event_json_is_tagged() {
        let v = serde_json::to_value(PlayerEvent::TrackEnded {
            track_id: "t1".into(),
        })
        .unwrap();
        assert_eq!(v["event"], "track_ended");
        assert_eq!(v["track_id"], "t1");
    }
}
