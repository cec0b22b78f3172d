//! Session lifecycle events published by the orchestrator.
//!
//! Every state mutation the orchestrator performs is mirrored as a
//! `SessionEvent` on the broadcast bus so UI layers can render without
//! holding the state lock. Events are notifications, not state -- the
//! authoritative snapshot is always `GamePlayerState`.

use serde::{Deserialize, Serialize};

use crate::message::ImageStatus;
use crate::session::SessionPhase;

/// Notification of a session state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The phase machine moved.
    PhaseChanged { phase: SessionPhase },

    /// A message was appended to the transcript.
    MessageAppended { message_id: String },

    /// A message was removed (retry of a failed player action).
    MessageRemoved { message_id: String },

    /// A text delta was appended to a streaming message.
    TextDelta { message_id: String, text: String },

    /// The image channel changed (new preview frame, completion, error).
    ImageUpdated {
        message_id: String,
        status: ImageStatus,
        image_hash: Option<String>,
    },

    /// Audio assembly finished for a message.
    AudioReady { message_id: String },

    /// The in-game status snapshot was replaced.
    StatusFieldsReplaced { message_id: String },

    /// Poll fallback became active for a message.
    PollingStarted { message_id: String },

    /// All expected channels for a turn reached a terminal state.
    TurnCompleted { message_id: String },

    /// The backend reported a turn failure, attributed to a message.
    TurnFailed {
        message_id: String,
        error: String,
        error_code: Option<String>,
    },

    /// A recoverable mid-session error was surfaced.
    StreamError { message: String },

    /// The session was reset to the initial idle snapshot.
    SessionReset,
}
