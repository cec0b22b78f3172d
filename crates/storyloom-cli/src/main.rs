//! Storyloom terminal client entry point.
//!
//! Binary name: `sloom`
//!
//! Parses CLI arguments, initializes tracing, wires the REST adapter and
//! HTTP transport into a `GamePlayer`, then hands off to the play loop.

mod cli;
mod play;

use std::sync::Arc;

use clap::Parser;
use secrecy::SecretString;

use storyloom_core::{GamePlayer, PlayerConfig};
use storyloom_infra::{Credentials, GuestSessionStore, HttpMessageTransport, RestSessionAdapter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,storyloom=debug",
        _ => "trace",
    };
    storyloom_observe::tracing_setup::init_tracing(filter, false)
        .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;

    let (credentials, config) = match (&cli.token, &cli.guest_token) {
        (Some(token), _) => (
            Credentials::Bearer(SecretString::from(token.clone())),
            PlayerConfig::default(),
        ),
        (None, Some(guest)) => (
            Credentials::Guest {
                token: SecretString::from(guest.clone()),
                store: Arc::new(GuestSessionStore::new()),
            },
            PlayerConfig::guest(),
        ),
        (None, None) => {
            anyhow::bail!("either --token or --guest-token is required");
        }
    };

    let (game, resume) = match &cli.command {
        Commands::Play { game } => (game.clone(), None),
        Commands::Continue { game, session_id } => (game.clone(), Some(session_id.clone())),
    };

    let adapter = RestSessionAdapter::new(&cli.base_url, game, credentials);
    let transport = HttpMessageTransport::new(&cli.base_url);
    let player = GamePlayer::new(adapter, transport, config);

    play::run(player, resume, cli.quiet).await
}
