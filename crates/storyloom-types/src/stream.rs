//! Wire units consumed by the streaming engine.
//!
//! `StreamChunk` is one SSE `data:` payload; `MessageStatus` is the full
//! snapshot served by the polling endpoint. Both are parsed and validated
//! once at the transport boundary -- consumers never re-derive meaning
//! from raw JSON.

use serde::{Deserialize, Serialize};

use crate::message::{ImageStatus, StatusField};

/// One event from the SSE stream.
///
/// A closed set of optional fields; each is checked independently
/// (a single chunk may carry any combination). Completion is channel-wise:
/// a turn is resolved only when text, image (if requested) and audio
/// (if requested) have each reached a terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamChunk {
    /// Text delta to append (monotonic, never a rewrite).
    pub text: Option<String>,
    pub text_done: bool,
    /// Partial preview frame, base64.
    pub image_data: Option<String>,
    pub image_done: bool,
    /// Audio fragment, base64.
    pub audio_data: Option<String>,
    pub audio_done: bool,
    /// Backend-reported turn failure; fatal for the whole turn.
    pub error: Option<String>,
    pub error_code: Option<String>,
    /// Authoritative in-game status snapshot, replaces the previous one.
    pub status_fields: Option<Vec<StatusField>>,
}

impl StreamChunk {
    /// Parse one SSE `data:` payload.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Full snapshot of a message from the polling endpoint.
///
/// Used to reconcile client state whenever SSE is not authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageStatus {
    /// Cumulative text so far (not a delta).
    pub text: Option<String>,
    pub text_done: bool,
    pub image_status: ImageStatus,
    pub image_hash: Option<String>,
    pub image_error: Option<String>,
    pub status_fields: Option<Vec<StatusField>>,
}

impl MessageStatus {
    /// Whether polling can stop: text finished and the image channel
    /// resolved (complete, error, or never requested).
    pub fn is_complete(&self) -> bool {
        self.text_done && self.image_status.is_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_parse_text_delta() {
        let chunk = StreamChunk::parse(r#"{"text":"Hello"}"#).unwrap();
        assert_eq!(chunk.text.as_deref(), Some("Hello"));
        assert!(!chunk.text_done);
        assert!(chunk.error.is_none());
    }

    #[test]
    fn test_chunk_parse_multiple_fields() {
        let chunk =
            StreamChunk::parse(r#"{"text":" world","textDone":true,"imageDone":true}"#).unwrap();
        assert_eq!(chunk.text.as_deref(), Some(" world"));
        assert!(chunk.text_done);
        assert!(chunk.image_done);
        assert!(!chunk.audio_done);
    }

    #[test]
    fn test_chunk_parse_error() {
        let chunk =
            StreamChunk::parse(r#"{"error":"AI down","errorCode":"ai_error"}"#).unwrap();
        assert_eq!(chunk.error.as_deref(), Some("AI down"));
        assert_eq!(chunk.error_code.as_deref(), Some("ai_error"));
    }

    #[test]
    fn test_chunk_parse_tolerates_unknown_fields() {
        let chunk = StreamChunk::parse(r#"{"text":"hi","futureField":42}"#).unwrap();
        assert_eq!(chunk.text.as_deref(), Some("hi"));
    }

    #[test]
    fn test_chunk_parse_rejects_malformed_json() {
        assert!(StreamChunk::parse("data: not json").is_err());
    }

    #[test]
    fn test_chunk_status_fields() {
        let chunk = StreamChunk::parse(
            r#"{"statusFields":[{"name":"Health","value":"80"}]}"#,
        )
        .unwrap();
        let fields = chunk.status_fields.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "Health");
    }

    #[test]
    fn test_status_complete_requires_both_channels() {
        let mut status = MessageStatus {
            text: Some("done text".to_string()),
            text_done: true,
            image_status: ImageStatus::Generating,
            ..Default::default()
        };
        assert!(!status.is_complete());

        status.image_status = ImageStatus::Complete;
        assert!(status.is_complete());
    }

    #[test]
    fn test_status_complete_with_no_image() {
        let status = MessageStatus {
            text_done: true,
            image_status: ImageStatus::None,
            ..Default::default()
        };
        assert!(status.is_complete());
    }

    #[test]
    fn test_status_complete_with_image_error() {
        let status = MessageStatus {
            text_done: true,
            image_status: ImageStatus::Error,
            image_error: Some("generation failed".to_string()),
            ..Default::default()
        };
        assert!(status.is_complete());
    }

    #[test]
    fn test_status_default_shape() {
        let status: MessageStatus = serde_json::from_str("{}").unwrap();
        assert!(status.text.is_none());
        assert!(!status.text_done);
        assert_eq!(status.image_status, ImageStatus::None);
    }
}
