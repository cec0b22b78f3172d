//! HTTP implementation of the `MessageTransport` port.
//!
//! Consumes the two public message endpoints:
//!
//! - `GET /messages/{id}/stream` -- chunked SSE response, decoded through
//!   `eventsource-stream` (which owns line buffering and UTF-8 decoding
//!   across reads, so multi-byte characters split across chunks are never
//!   corrupted) and parsed into [`StreamChunk`]s once at this boundary.
//! - `GET /messages/{id}/status` -- JSON snapshot of a message.
//!
//! Both are keyed by message id only; no session credential is required
//! by the backend for these endpoints.

use std::collections::HashMap;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use tracing::trace;

use storyloom_core::transport::{ChunkStream, MessageTransport};
use storyloom_types::error::TransportError;
use storyloom_types::stream::{MessageStatus, StreamChunk};

/// Message transport over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpMessageTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMessageTransport {
    /// Create a transport for the given backend base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        // No total request timeout: an SSE stream stays open for the
        // whole turn. Connect attempts are still bounded.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to create reqwest client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Build the full URL for a given path.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl MessageTransport for HttpMessageTransport {
    async fn open_stream(
        &self,
        message_id: &str,
        headers: HashMap<String, String>,
    ) -> Result<ChunkStream, TransportError> {
        let url = self.url(&format!("/messages/{message_id}/stream"));

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut events = response.bytes_stream().eventsource();
        Ok(Box::pin(async_stream::try_stream! {
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| TransportError::Stream(e.to_string()))?;
                if event.data.is_empty() {
                    continue;
                }
                trace!(data_len = event.data.len(), "sse event received");
                let chunk = StreamChunk::parse(&event.data)
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                yield chunk;
            }
        }))
    }

    async fn fetch_status(&self, message_id: &str) -> Result<MessageStatus, TransportError> {
        let url = self.url(&format!("/messages/{message_id}/status"));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<MessageStatus>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let transport = HttpMessageTransport::new("https://play.example.com");
        assert_eq!(
            transport.url("/messages/m1/stream"),
            "https://play.example.com/messages/m1/stream"
        );
    }

    #[test]
    fn test_url_building_trailing_slash() {
        let transport = HttpMessageTransport::new("https://play.example.com/");
        assert_eq!(
            transport.url("/messages/m1/status"),
            "https://play.example.com/messages/m1/status"
        );
    }
}
