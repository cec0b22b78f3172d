//! CLI argument definitions for the `sloom` binary.
//!
//! Uses clap derive macros. Credentials and the backend URL come from
//! flags or environment variables, so scripted use needs no interactive
//! setup.

use clap::{Parser, Subcommand};

/// Play AI-narrated games from your terminal.
#[derive(Parser)]
#[command(name = "sloom", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Backend base URL.
    #[arg(
        long,
        env = "STORYLOOM_BASE_URL",
        default_value = "http://localhost:8787",
        global = true
    )]
    pub base_url: String,

    /// Bearer token for authenticated play.
    #[arg(long, env = "STORYLOOM_TOKEN", global = true)]
    pub token: Option<String>,

    /// Guest token for anonymous play (used when no bearer token is set).
    #[arg(long, env = "STORYLOOM_GUEST_TOKEN", global = true)]
    pub guest_token: Option<String>,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new session for a game.
    Play {
        /// Game id to play.
        game: String,
    },

    /// Continue an existing session.
    #[command(alias = "resume")]
    Continue {
        /// Game id the session belongs to.
        game: String,

        /// Session id to resume.
        session_id: String,
    },
}
