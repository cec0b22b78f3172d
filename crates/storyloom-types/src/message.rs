//! Scene message types for Storyloom.
//!
//! A `SceneMessage` is one turn's worth of content: either the player's
//! action text or the game's AI-generated response. Game messages carry
//! three independently-completing channels (text, image, audio) that are
//! mutated in place while a turn streams.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Who authored a message in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Player,
    Game,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Player => write!(f, "player"),
            MessageKind::Game => write!(f, "game"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "player" => Ok(MessageKind::Player),
            "game" => Ok(MessageKind::Game),
            other => Err(format!("invalid message kind: '{other}'")),
        }
    }
}

/// Lifecycle of a message's image channel.
///
/// `None` means no image was requested for this turn; it counts as a
/// resolved state for completion purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    #[default]
    None,
    Generating,
    Complete,
    Error,
}

impl ImageStatus {
    /// Whether the image channel has reached a terminal state
    /// (complete, error, or never requested).
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ImageStatus::Generating)
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageStatus::None => write!(f, "none"),
            ImageStatus::Generating => write!(f, "generating"),
            ImageStatus::Complete => write!(f, "complete"),
            ImageStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for ImageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ImageStatus::None),
            "generating" => Ok(ImageStatus::Generating),
            "complete" => Ok(ImageStatus::Complete),
            "error" => Ok(ImageStatus::Error),
            other => Err(format!("invalid image status: '{other}'")),
        }
    }
}

/// Lifecycle of a message's audio channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioStatus {
    /// No audio requested or nothing received yet.
    #[default]
    Idle,
    /// Audio fragments are arriving.
    Loading,
    /// Audio is terminal. A `Ready` message may still have no playable
    /// bytes if assembly failed -- a bad clip never fails the turn.
    Ready,
}

impl fmt::Display for AudioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioStatus::Idle => write!(f, "idle"),
            AudioStatus::Loading => write!(f, "loading"),
            AudioStatus::Ready => write!(f, "ready"),
        }
    }
}

/// One name/value pair of in-game state (health, location, inventory...).
///
/// Status fields are an authoritative snapshot: each receipt replaces the
/// previous list wholesale, ordering preserved from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusField {
    pub name: String,
    pub value: String,
}

/// One turn's content in the transcript.
///
/// Player messages get a client-generated transient id (the backend never
/// re-keys them); game messages are keyed by the backend-assigned id from
/// their `MessageDescriptor`. Ids are immutable once assigned, and the
/// transcript is append-only -- streaming only mutates a message in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMessage {
    pub id: String,
    pub kind: MessageKind,
    /// Append-only accumulator while streaming; never rewound.
    pub text: String,
    pub is_streaming: bool,
    pub status_fields: Vec<StatusField>,
    pub image_status: ImageStatus,
    /// Opaque cache-busting token; changes whenever new image bytes exist.
    pub image_hash: Option<String>,
    /// Latest partial preview frame (base64), replaced as frames arrive.
    pub image_preview: Option<String>,
    pub audio_status: AudioStatus,
    /// Assembled audio bytes, present only after a successful decode.
    #[serde(skip)]
    pub audio: Option<Vec<u8>>,
    /// Set when the round-trip for this message failed; cleared on retry.
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl SceneMessage {
    /// A finished player-authored message.
    pub fn player(id: String, text: String) -> Self {
        Self {
            id,
            kind: MessageKind::Player,
            text,
            is_streaming: false,
            status_fields: Vec::new(),
            image_status: ImageStatus::None,
            image_hash: None,
            image_preview: None,
            audio_status: AudioStatus::Idle,
            audio: None,
            error: None,
            error_code: None,
        }
    }

    /// A game-side placeholder in streaming shape, derived from the
    /// descriptor the backend returned for the turn.
    pub fn streaming_placeholder(descriptor: &MessageDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            kind: MessageKind::Game,
            text: String::new(),
            is_streaming: descriptor.stream,
            status_fields: descriptor.status_fields.clone(),
            image_status: if descriptor.has_image {
                ImageStatus::Generating
            } else {
                ImageStatus::None
            },
            image_hash: None,
            image_preview: None,
            audio_status: if descriptor.has_audio {
                AudioStatus::Loading
            } else {
                AudioStatus::Idle
            },
            audio: None,
            error: None,
            error_code: None,
        }
    }
}

/// Shape returned by the adapter's `create_session` / `send_action` calls
/// to describe a newly persisted game-side message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDescriptor {
    pub id: String,
    /// Whether an SSE stream should be opened for this message at all.
    pub stream: bool,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default)]
    pub image_prompt: Option<String>,
    #[serde(default)]
    pub has_audio: bool,
    #[serde(default)]
    pub status_fields: Vec<StatusField>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_roundtrip() {
        for kind in [MessageKind::Player, MessageKind::Game] {
            let s = kind.to_string();
            let parsed: MessageKind = s.parse().unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn test_image_status_roundtrip() {
        for status in [
            ImageStatus::None,
            ImageStatus::Generating,
            ImageStatus::Complete,
            ImageStatus::Error,
        ] {
            let s = status.to_string();
            let parsed: ImageStatus = s.parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_image_status_resolved() {
        assert!(ImageStatus::None.is_resolved());
        assert!(ImageStatus::Complete.is_resolved());
        assert!(ImageStatus::Error.is_resolved());
        assert!(!ImageStatus::Generating.is_resolved());
    }

    #[test]
    fn test_streaming_placeholder_channels() {
        let descriptor = MessageDescriptor {
            id: "m1".to_string(),
            stream: true,
            has_image: true,
            image_prompt: Some("a dark forest".to_string()),
            has_audio: false,
            status_fields: vec![StatusField {
                name: "Health".to_string(),
                value: "100".to_string(),
            }],
        };

        let msg = SceneMessage::streaming_placeholder(&descriptor);
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.kind, MessageKind::Game);
        assert!(msg.text.is_empty());
        assert!(msg.is_streaming);
        assert_eq!(msg.image_status, ImageStatus::Generating);
        assert_eq!(msg.audio_status, AudioStatus::Idle);
        assert_eq!(msg.status_fields.len(), 1);
    }

    #[test]
    fn test_streaming_placeholder_non_streaming() {
        let descriptor = MessageDescriptor {
            id: "m2".to_string(),
            stream: false,
            has_image: false,
            image_prompt: None,
            has_audio: true,
            status_fields: vec![],
        };

        let msg = SceneMessage::streaming_placeholder(&descriptor);
        assert!(!msg.is_streaming);
        assert_eq!(msg.image_status, ImageStatus::None);
        assert_eq!(msg.audio_status, AudioStatus::Loading);
    }

    #[test]
    fn test_descriptor_deserialize_defaults() {
        let json = r#"{"id":"m3","stream":true}"#;
        let descriptor: MessageDescriptor = serde_json::from_str(json).unwrap();
        assert!(!descriptor.has_image);
        assert!(!descriptor.has_audio);
        assert!(descriptor.image_prompt.is_none());
        assert!(descriptor.status_fields.is_empty());
    }

    #[test]
    fn test_descriptor_camel_case_wire_shape() {
        let json = r#"{"id":"m4","stream":true,"hasImage":true,"hasAudio":true,"imagePrompt":"castle"}"#;
        let descriptor: MessageDescriptor = serde_json::from_str(json).unwrap();
        assert!(descriptor.has_image);
        assert!(descriptor.has_audio);
        assert_eq!(descriptor.image_prompt.as_deref(), Some("castle"));
    }
}
