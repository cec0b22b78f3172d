//! Error types for the Storyloom engine, split by failure scope.
//!
//! Transport-transient failures are never surfaced directly -- they feed
//! the fallback machinery. Adapter errors are translated at the call site
//! into message- or session-scoped state. Session errors are phase-level
//! and fatal.

use thiserror::Error;

/// Errors from the message transport (SSE stream, status endpoint).
///
/// These are transient by taxonomy: the engine recovers via fallback and
/// only escalates after exhausting the poll failure budget.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// Client-initiated abort; suppresses the poll fallback.
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether this failure was a client-initiated cancellation rather
    /// than a real transport problem.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// Errors from `SessionAdapter` calls (create, send, load).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http error: {0}")]
    Http(String),

    #[error("backend rejected request ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),
}

/// Session-level fatal conditions surfaced through orchestrator operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session created with no messages")]
    EmptyCreateResponse,

    #[error("operation requires phase '{expected}', session is '{actual}'")]
    InvalidPhase {
        expected: &'static str,
        actual: String,
    },

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
