//! Shared domain types for Storyloom.
//!
//! This crate contains the core domain types used across the Storyloom
//! engine: sessions, scene messages, wire-level stream chunks and status
//! snapshots, session events, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, thiserror.

pub mod error;
pub mod event;
pub mod message;
pub mod session;
pub mod stream;
