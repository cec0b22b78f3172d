//! REST implementation of the `SessionAdapter` port.
//!
//! One adapter covers both access modes: authenticated sessions carry a
//! bearer token, guest sessions carry an opaque guest token plus a
//! token-scoped [`GuestSessionStore`] that records created session ids,
//! so a reloaded guest client can recover its session without an account.
//!
//! Tokens are wrapped in [`secrecy::SecretString`] and never appear in
//! `Debug` output or logs.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use storyloom_core::adapter::SessionAdapter;
use storyloom_types::error::AdapterError;
use storyloom_types::message::{MessageDescriptor, StatusField};
use storyloom_types::session::{CreatedSession, LoadedSession};

/// Token-scoped persistence of guest session ids.
///
/// Keyed by guest token; a second client constructed with the same token
/// recalls the same session id. Backed by an in-process concurrent map;
/// durable storage is the embedding application's concern.
#[derive(Debug, Default)]
pub struct GuestSessionStore {
    sessions: DashMap<String, String>,
}

impl GuestSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the session id created under a guest token.
    pub fn record(&self, token: &str, session_id: &str) {
        self.sessions
            .insert(token.to_string(), session_id.to_string());
    }

    /// Recall the session id previously created under a guest token.
    pub fn recall(&self, token: &str) -> Option<String> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }
}

/// How the adapter authenticates against the backend.
pub enum Credentials {
    /// Authenticated user: `Authorization: Bearer <token>`.
    Bearer(SecretString),
    /// Guest: `x-guest-token` header plus session-id persistence.
    Guest {
        token: SecretString,
        store: Arc<GuestSessionStore>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendActionBody<'a> {
    message: &'a str,
    status_fields: &'a [StatusField],
}

/// `SessionAdapter` over the backend REST API.
pub struct RestSessionAdapter {
    client: reqwest::Client,
    base_url: String,
    game_id: String,
    credentials: Credentials,
}

impl RestSessionAdapter {
    pub fn new(
        base_url: impl Into<String>,
        game_id: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("failed to create reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            game_id: game_id.into(),
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        match &self.credentials {
            Credentials::Bearer(token) => {
                headers.insert(
                    "authorization".to_string(),
                    format!("Bearer {}", token.expose_secret()),
                );
            }
            Credentials::Guest { token, .. } => {
                headers.insert(
                    "x-guest-token".to_string(),
                    token.expose_secret().to_string(),
                );
            }
        }
        headers
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in self.auth_headers() {
            request = request.header(name, value);
        }
        request
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(AdapterError::Backend {
            status: status.as_u16(),
            message,
        })
    }
}

impl SessionAdapter for RestSessionAdapter {
    async fn create_session(&self) -> Result<CreatedSession, AdapterError> {
        let url = self.url(&format!("/games/{}/sessions", self.game_id));
        let response = self
            .apply_headers(self.client.post(&url))
            .send()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?;

        Self::check(response)
            .await?
            .json::<CreatedSession>()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))
    }

    async fn send_action(
        &self,
        session_id: &str,
        message_text: &str,
        status_fields: &[StatusField],
    ) -> Result<MessageDescriptor, AdapterError> {
        let url = self.url(&format!("/sessions/{session_id}/messages"));
        let body = SendActionBody {
            message: message_text,
            status_fields,
        };
        let response = self
            .apply_headers(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?;

        Self::check(response)
            .await?
            .json::<MessageDescriptor>()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))
    }

    async fn load_session(&self, session_id: &str) -> Result<LoadedSession, AdapterError> {
        let url = self.url(&format!("/sessions/{session_id}"));
        let response = self
            .apply_headers(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?;

        Self::check(response)
            .await?
            .json::<LoadedSession>()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))
    }

    async fn stream_headers(&self) -> HashMap<String, String> {
        self.auth_headers()
    }

    async fn on_session_created(&self, session_id: &str) {
        match &self.credentials {
            Credentials::Guest { token, store } => {
                store.record(token.expose_secret(), session_id);
                debug!(session_id = %session_id, "guest session recorded");
            }
            Credentials::Bearer(_) => {
                // Cache invalidation for authenticated listings lives in
                // the application layer.
                debug!(session_id = %session_id, "session created");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bearer_adapter() -> RestSessionAdapter {
        RestSessionAdapter::new(
            "https://play.example.com",
            "g1",
            Credentials::Bearer(SecretString::from("token-not-real")),
        )
    }

    fn guest_adapter(store: Arc<GuestSessionStore>, token: &str) -> RestSessionAdapter {
        RestSessionAdapter::new(
            "https://play.example.com",
            "g1",
            Credentials::Guest {
                token: SecretString::from(token),
                store,
            },
        )
    }

    #[test]
    fn test_url_building() {
        let adapter = bearer_adapter();
        assert_eq!(
            adapter.url("/sessions/s1"),
            "https://play.example.com/sessions/s1"
        );
    }

    #[tokio::test]
    async fn test_bearer_headers() {
        let adapter = bearer_adapter();
        let headers = adapter.stream_headers().await;
        assert_eq!(
            headers.get("authorization").map(String::as_str),
            Some("Bearer token-not-real")
        );
    }

    #[tokio::test]
    async fn test_guest_headers() {
        let store = Arc::new(GuestSessionStore::new());
        let adapter = guest_adapter(store, "guest-abc");
        let headers = adapter.stream_headers().await;
        assert_eq!(
            headers.get("x-guest-token").map(String::as_str),
            Some("guest-abc")
        );
        assert!(!headers.contains_key("authorization"));
    }

    #[test]
    fn test_guest_store_record_and_recall() {
        let store = GuestSessionStore::new();
        assert!(store.recall("guest-abc").is_none());

        store.record("guest-abc", "s42");
        assert_eq!(store.recall("guest-abc").as_deref(), Some("s42"));
        assert!(store.recall("guest-other").is_none());
    }

    #[tokio::test]
    async fn test_guest_session_recoverable_across_adapters() {
        let store = Arc::new(GuestSessionStore::new());

        let first = guest_adapter(Arc::clone(&store), "guest-abc");
        first.on_session_created("s42").await;

        // A second adapter constructed with the same token recovers the
        // same session id through the shared store.
        let second = guest_adapter(Arc::clone(&store), "guest-abc");
        match &second.credentials {
            Credentials::Guest { token, store } => {
                assert_eq!(
                    store.recall(token.expose_secret()).as_deref(),
                    Some("s42")
                );
            }
            Credentials::Bearer(_) => panic!("expected guest credentials"),
        }
    }

    #[tokio::test]
    async fn test_bearer_on_session_created_is_noop() {
        let adapter = bearer_adapter();
        adapter.on_session_created("s1").await;
    }

    #[test]
    fn test_send_action_body_wire_shape() {
        let fields = vec![StatusField {
            name: "Health".to_string(),
            value: "100".to_string(),
        }];
        let body = SendActionBody {
            message: "go north",
            status_fields: &fields,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"message\":\"go north\""));
        assert!(json.contains("\"statusFields\""));
    }
}
