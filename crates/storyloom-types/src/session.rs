//! Session and player-state types for Storyloom.
//!
//! A session identifies one play-through of a game. `GamePlayerState` is
//! the orchestrator's aggregate: the phase machine, the ordered transcript,
//! and the separated fatal/recoverable error fields the UI renders from.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::message::{ImageStatus, MessageDescriptor, MessageKind, SceneMessage, StatusField};

/// Phase of the session state machine.
///
/// `Idle -> Starting -> Playing <-> NeedsApiKey`, with `Error` reachable
/// from any phase on unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Starting,
    Playing,
    NeedsApiKey,
    Error,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Starting => write!(f, "starting"),
            SessionPhase::Playing => write!(f, "playing"),
            SessionPhase::NeedsApiKey => write!(f, "needs-api-key"),
            SessionPhase::Error => write!(f, "error"),
        }
    }
}

impl FromStr for SessionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SessionPhase::Idle),
            "starting" => Ok(SessionPhase::Starting),
            "playing" => Ok(SessionPhase::Playing),
            "needs-api-key" => Ok(SessionPhase::NeedsApiKey),
            "error" => Ok(SessionPhase::Error),
            other => Err(format!("invalid session phase: '{other}'")),
        }
    }
}

/// Static information about the game a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub game_id: String,
    pub game_name: String,
    #[serde(default)]
    pub game_description: String,
}

/// Backend response to `create_session`.
///
/// The backend assigns the session id and seeds the transcript with at
/// least one message descriptor (the opening scene). An empty `messages`
/// list is a session-level fatal condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub id: String,
    #[serde(flatten)]
    pub game: GameInfo,
    /// Opaque presentation payload, passed through untouched.
    #[serde(default)]
    pub theme: Option<serde_json::Value>,
    /// Absence of a server-recognized credential forces `needs-api-key`.
    #[serde(default = "default_true")]
    pub api_key_present: bool,
    pub messages: Vec<MessageDescriptor>,
}

fn default_true() -> bool {
    true
}

/// One historical message as returned by `load_session`.
///
/// Unlike a `MessageDescriptor`, loaded messages carry their accumulated
/// text and streaming/image state, so a reloaded client can resume a
/// mid-turn conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedMessage {
    pub id: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub status_fields: Vec<StatusField>,
    #[serde(default)]
    pub image_status: ImageStatus,
    #[serde(default)]
    pub image_hash: Option<String>,
    #[serde(default)]
    pub has_audio: bool,
}

impl LoadedMessage {
    /// Map a loaded message into transcript shape.
    pub fn into_scene_message(self) -> SceneMessage {
        let mut msg = SceneMessage::player(self.id, self.text);
        msg.kind = self.kind;
        msg.is_streaming = self.is_streaming;
        msg.status_fields = self.status_fields;
        msg.image_status = self.image_status;
        msg.image_hash = self.image_hash;
        msg
    }
}

/// Backend response to `load_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedSession {
    pub id: String,
    #[serde(flatten)]
    pub game: GameInfo,
    #[serde(default)]
    pub theme: Option<serde_json::Value>,
    /// Presence drives `playing`; absence drives `needs-api-key`.
    #[serde(default)]
    pub api_key_id: Option<String>,
    pub messages: Vec<LoadedMessage>,
}

/// The orchestrator's aggregate state, rendered directly by the UI layer.
///
/// `error` is phase-level and fatal; `stream_error` is a recoverable
/// mid-session notice that can be dismissed without discarding the
/// transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GamePlayerState {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub game: Option<GameInfo>,
    pub messages: Vec<SceneMessage>,
    /// Latest authoritative in-game status snapshot.
    pub status_fields: Vec<StatusField>,
    /// True between sending/creating and text completion.
    pub is_waiting_for_response: bool,
    /// Session-level fatal error; only recoverable by restarting the flow.
    pub error: Option<String>,
    /// Recoverable mid-session error, dismissible via `clear_stream_error`.
    pub stream_error: Option<String>,
    pub theme: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_phase_roundtrip() {
        for phase in [
            SessionPhase::Idle,
            SessionPhase::Starting,
            SessionPhase::Playing,
            SessionPhase::NeedsApiKey,
            SessionPhase::Error,
        ] {
            let s = phase.to_string();
            let parsed: SessionPhase = s.parse().unwrap();
            assert_eq!(phase, parsed);
        }
    }

    #[test]
    fn test_session_phase_serde_kebab() {
        let json = serde_json::to_string(&SessionPhase::NeedsApiKey).unwrap();
        assert_eq!(json, "\"needs-api-key\"");
    }

    #[test]
    fn test_created_session_deserialize() {
        let json = r#"{
            "id": "s1",
            "gameId": "g1",
            "gameName": "The Hollow Crown",
            "gameDescription": "A dark fantasy adventure",
            "messages": [{"id": "m1", "stream": true}]
        }"#;
        let created: CreatedSession = serde_json::from_str(json).unwrap();
        assert_eq!(created.id, "s1");
        assert_eq!(created.game.game_name, "The Hollow Crown");
        assert!(created.api_key_present);
        assert_eq!(created.messages.len(), 1);
    }

    #[test]
    fn test_created_session_missing_api_key() {
        let json = r#"{
            "id": "s1",
            "gameId": "g1",
            "gameName": "Test",
            "apiKeyPresent": false,
            "messages": []
        }"#;
        let created: CreatedSession = serde_json::from_str(json).unwrap();
        assert!(!created.api_key_present);
        assert!(created.messages.is_empty());
    }

    #[test]
    fn test_loaded_message_into_scene_message() {
        let loaded = LoadedMessage {
            id: "m1".to_string(),
            kind: MessageKind::Game,
            text: "Once upon a time".to_string(),
            is_streaming: true,
            status_fields: vec![],
            image_status: ImageStatus::Generating,
            image_hash: Some("h1".to_string()),
            has_audio: false,
        };

        let msg = loaded.into_scene_message();
        assert_eq!(msg.kind, MessageKind::Game);
        assert_eq!(msg.text, "Once upon a time");
        assert!(msg.is_streaming);
        assert_eq!(msg.image_status, ImageStatus::Generating);
        assert_eq!(msg.image_hash.as_deref(), Some("h1"));
    }

    #[test]
    fn test_loaded_session_api_key_id() {
        let json = r#"{
            "id": "s1",
            "gameId": "g1",
            "gameName": "Test",
            "messages": []
        }"#;
        let loaded: LoadedSession = serde_json::from_str(json).unwrap();
        assert!(loaded.api_key_id.is_none());
    }

    #[test]
    fn test_player_state_default_is_idle() {
        let state = GamePlayerState::default();
        assert_eq!(state.phase, SessionPhase::Idle);
        assert!(state.messages.is_empty());
        assert!(!state.is_waiting_for_response);
        assert!(state.error.is_none());
        assert!(state.stream_error.is_none());
    }
}
