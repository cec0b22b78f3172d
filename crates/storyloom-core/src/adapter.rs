//! SessionAdapter trait definition.
//!
//! This is the boundary to the backend-API layer: session creation,
//! action submission, and rehydration. Uses native async fn in traits
//! (RPITIT); implementations live in `storyloom-infra`. The orchestrator
//! is generic over the adapter, so tests substitute in-memory fakes
//! without any network mocking.

use std::collections::HashMap;
use std::future::Future;

use storyloom_types::error::AdapterError;
use storyloom_types::message::{MessageDescriptor, StatusField};
use storyloom_types::session::{CreatedSession, LoadedSession};

/// Backend boundary for session lifecycle calls.
///
/// The two public message endpoints (`/messages/{id}/stream`,
/// `/messages/{id}/status`) are deliberately NOT part of this trait --
/// they are unauthenticated by design and consumed directly through
/// [`crate::transport::MessageTransport`].
pub trait SessionAdapter: Send + Sync {
    /// Create a new session for the configured game.
    fn create_session(
        &self,
    ) -> impl Future<Output = Result<CreatedSession, AdapterError>> + Send;

    /// Submit a player action; returns the descriptor of the game-side
    /// message the backend persisted for the turn.
    fn send_action(
        &self,
        session_id: &str,
        message_text: &str,
        status_fields: &[StatusField],
    ) -> impl Future<Output = Result<MessageDescriptor, AdapterError>> + Send;

    /// Rehydrate an existing session after reload or navigation.
    fn load_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<LoadedSession, AdapterError>> + Send;

    /// Headers to attach to SSE stream requests (e.g., bearer token
    /// lookup). Async because credentials may need refreshing.
    fn stream_headers(&self) -> impl Future<Output = HashMap<String, String>> + Send;

    /// Fire-and-forget hook invoked after a successful `create_session`,
    /// for cache-invalidation or persistence side effects owned by the
    /// API layer (e.g., recording a guest session id).
    fn on_session_created(&self, session_id: &str) -> impl Future<Output = ()> + Send;
}
