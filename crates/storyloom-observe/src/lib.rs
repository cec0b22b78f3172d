//! Observability setup for Storyloom.

pub mod tracing_setup;
