//! Chatter - terminal front end.
//!
//! Every stdin line is delivered to one chat group as a message; replies are
//! printed to stdout. Lines starting with `cgpt` run session commands.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

mod command;
mod stdio;

use anyhow::{Context, Result};
use chatter_common::config::Config;
use chatter_common::logging::init_logging_with_exclusions;
use chatter_core::{OpenAiProvider, OrchestratorSettings, ReplyOrchestrator, SessionStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stdio::{LineContext, StdoutTransport};
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// Group-chat assistant over stdin/stdout.
#[derive(Parser, Debug)]
#[command(name = "chatter")]
#[command(version)]
#[command(about = "Chat with the group assistant from a terminal", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.chatter/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Group the typed lines belong to
    #[arg(long, default_value_t = 1)]
    group: i64,

    /// The assistant's own participant id; `@<id> ` addresses it
    #[arg(long, default_value_t = 10_000)]
    bot_id: i64,

    /// Sender of lines without a `<id>:` prefix
    #[arg(long, default_value_t = 1)]
    sender: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_env(cli.config.as_deref()).context("Failed to load config")?;
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );
    config.validate().context("Invalid configuration")?;

    tracing::info!("Chatter v{}", env!("CARGO_PKG_VERSION"));

    let provider = OpenAiProvider::from_config(&config.backend)?;
    let data_dir = config.storage.data_dir();
    let store = SessionStore::in_dir(&data_dir);
    let orchestrator = ReplyOrchestrator::load(
        store,
        &config.context.default_persona,
        Arc::new(provider),
        Arc::new(StdoutTransport),
        OrchestratorSettings::from_config(&config),
    )
    .with_context(|| format!("Failed to load sessions from {}", data_dir.display()))?;

    let lines = LineContext {
        group_id: cli.group,
        bot_id: cli.bot_id,
        default_sender: cli.sender,
    };
    tracing::info!(
        group_id = lines.group_id,
        bot_id = lines.bot_id,
        data_dir = %data_dir.display(),
        "Reading messages from stdin"
    );

    tokio::select! {
        result = read_lines(&orchestrator, lines) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    tokio::select! {
        () = orchestrator.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Dropping pending replies"),
    }

    orchestrator
        .persist()
        .await
        .context("Failed to save sessions")?;
    Ok(())
}

async fn read_lines(orchestrator: &ReplyOrchestrator, ctx: LineContext) -> Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        match command::parse(line) {
            Some(Ok(cmd)) => {
                let reply = orchestrator.execute(ctx.group_id, cmd).await;
                println!("{reply}");
            }
            Some(Err(problem)) => println!("{problem}"),
            None => {
                let outcome = orchestrator
                    .record_and_maybe_reply(ctx.to_message(line))
                    .await;
                tracing::debug!(?outcome, "Message handled");
            }
        }
    }

    Ok(())
}
