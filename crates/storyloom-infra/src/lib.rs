//! Infrastructure layer for Storyloom.
//!
//! Contains implementations of the ports defined in `storyloom-core`:
//! the HTTP message transport (SSE stream + status snapshot endpoints)
//! and the REST session adapters (authenticated and guest-token).

pub mod adapter;
pub mod http;

pub use adapter::{Credentials, GuestSessionStore, RestSessionAdapter};
pub use http::HttpMessageTransport;
