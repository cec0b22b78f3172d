//! Session orchestration and streaming engine for Storyloom.
//!
//! This crate defines the "ports" (`SessionAdapter`, `MessageTransport`)
//! that the infrastructure layer implements, and owns the engine built on
//! top of them: the session orchestrator (`GamePlayer`), the per-turn
//! channel completion tracker, the silence watchdog, and the poll
//! fallback. It depends only on `storyloom-types` and async runtime
//! crates -- never on HTTP or any IO crate.

pub mod adapter;
pub mod audio;
pub mod config;
pub mod event;
pub mod player;
pub mod poller;
pub mod tracker;
pub mod transport;
pub mod watchdog;

pub use adapter::SessionAdapter;
pub use config::PlayerConfig;
pub use event::SessionEventBus;
pub use player::GamePlayer;
pub use transport::{ChunkStream, MessageTransport};
