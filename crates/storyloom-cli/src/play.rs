//! Interactive play loop: renders session events to the terminal and
//! feeds player actions back into the orchestrator.

use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};

use storyloom_core::GamePlayer;
use storyloom_infra::{HttpMessageTransport, RestSessionAdapter};
use storyloom_types::event::SessionEvent;
use storyloom_types::message::ImageStatus;
use storyloom_types::session::SessionPhase;

type Player = GamePlayer<RestSessionAdapter, HttpMessageTransport>;

/// Render session events until the subscription ends.
async fn render_events(
    mut rx: tokio::sync::broadcast::Receiver<SessionEvent>,
    quiet: bool,
) {
    while let Ok(event) = rx.recv().await {
        match event {
            SessionEvent::TextDelta { text, .. } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            SessionEvent::TurnCompleted { .. } => {
                println!();
                print!("{} ", console::style(">").cyan().bold());
                let _ = std::io::stdout().flush();
            }
            SessionEvent::TurnFailed { error, .. } => {
                println!();
                println!(
                    "{} {} {}",
                    console::style("✗").red(),
                    console::style(&error).red(),
                    console::style("(type /retry to try again)").dim()
                );
            }
            SessionEvent::StreamError { message } => {
                println!();
                println!("{} {}", console::style("!").yellow(), message);
            }
            SessionEvent::ImageUpdated { status, .. } if !quiet => {
                if status == ImageStatus::Complete {
                    println!();
                    println!("{}", console::style("[scene image ready]").dim());
                }
            }
            SessionEvent::AudioReady { .. } if !quiet => {
                println!("{}", console::style("[narration audio ready]").dim());
            }
            SessionEvent::PhaseChanged {
                phase: SessionPhase::NeedsApiKey,
            } => {
                println!(
                    "{}",
                    console::style("This game needs an API key configured before play.")
                        .yellow()
                );
            }
            _ => {}
        }
    }
}

/// Drive one session to completion from the terminal.
///
/// `resume` rehydrates an existing session instead of creating one.
pub async fn run(player: Player, resume: Option<String>, quiet: bool) -> anyhow::Result<()> {
    let events = player.subscribe();
    let renderer = tokio::spawn(render_events(events, quiet));

    match resume {
        Some(session_id) => player.load_existing_session(&session_id).await?,
        None => {
            player.start_session().await?;
            if let Some(id) = player.state().session_id {
                println!(
                    "{} {}",
                    console::style("session").dim(),
                    console::style(&id).dim()
                );
            }
        }
    }

    if let Some(game) = player.state().game {
        println!(
            "{}",
            console::style(format!("— {} —", game.game_name)).magenta().bold()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => {}
            "/quit" | "/exit" => break,
            "/retry" => player.retry_last_action().await,
            _ => player.send_action(input).await,
        }
        if let Some(error) = player.state().error {
            anyhow::bail!("session failed: {error}");
        }
    }

    player.reset();
    renderer.abort();
    Ok(())
}
