//! Merge rules for poll snapshots.
//!
//! Stateless functions applying a `MessageStatus` snapshot to a scene
//! message. The rules keep the coarse polling channel from fighting a
//! live SSE stream: text is only overwritten while SSE is inactive and
//! only when the snapshot is strictly longer (displayed text length is
//! non-decreasing at every step); image/status fields are applied only on
//! change to avoid redundant re-renders.

use storyloom_types::message::{ImageStatus, SceneMessage};
use storyloom_types::stream::MessageStatus;

/// What a snapshot application actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotApplied {
    pub text_grew: bool,
    pub text_done: bool,
    pub image_changed: bool,
    pub fields_changed: bool,
}

/// Apply one snapshot to a message under the merge rules.
///
/// `sse_active` gates text overwrites: while the fine-grained stream is
/// authoritative, a slower snapshot must not cause visible jumps.
pub fn apply_snapshot(
    message: &mut SceneMessage,
    status: &MessageStatus,
    sse_active: bool,
) -> SnapshotApplied {
    let mut applied = SnapshotApplied::default();

    if !sse_active
        && let Some(text) = &status.text
        && text.len() > message.text.len()
    {
        message.text = text.clone();
        applied.text_grew = true;
    }

    if status.text_done {
        applied.text_done = true;
        message.is_streaming = false;
    }

    if status.image_status != message.image_status
        || status.image_hash != message.image_hash
    {
        // Never regress a resolved image back to generating; a stale
        // snapshot can arrive after SSE already completed the channel.
        let regressing = message.image_status.is_resolved()
            && status.image_status == ImageStatus::Generating;
        if !regressing {
            message.image_status = status.image_status;
            if status.image_hash.is_some() {
                message.image_hash = status.image_hash.clone();
            }
            applied.image_changed = true;
        }
    }

    if let Some(fields) = &status.status_fields
        && fields != &message.status_fields
    {
        message.status_fields = fields.clone();
        applied.fields_changed = true;
    }

    applied
}
