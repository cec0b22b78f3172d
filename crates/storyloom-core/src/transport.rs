//! MessageTransport trait definition.
//!
//! Port for the two public wire endpoints the engine consumes by message
//! id alone: the SSE event stream and the JSON status snapshot. The
//! stream payload is a boxed `Stream` (the same object-safety shape as
//! a provider `stream()` call); the methods themselves use RPITIT.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;

use storyloom_types::error::TransportError;
use storyloom_types::stream::{MessageStatus, StreamChunk};

/// A live SSE stream decoded into typed chunks.
///
/// The transport owns line buffering and UTF-8 decoding across reads;
/// consumers only ever see whole, validated chunks.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<StreamChunk, TransportError>> + Send + 'static>>;

/// Port for the public message endpoints.
pub trait MessageTransport: Send + Sync {
    /// Open `GET /messages/{id}/stream` and decode it into chunks.
    ///
    /// A non-success HTTP status is an `Err` -- the caller decides
    /// whether to fall back to polling.
    fn open_stream(
        &self,
        message_id: &str,
        headers: HashMap<String, String>,
    ) -> impl Future<Output = Result<ChunkStream, TransportError>> + Send;

    /// Fetch the `GET /messages/{id}/status` snapshot.
    fn fetch_status(
        &self,
        message_id: &str,
    ) -> impl Future<Output = Result<MessageStatus, TransportError>> + Send;
}
