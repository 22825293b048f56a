#![forbid(unsafe_code)]

//! `followup-bot-responder`: answers Telegram `/start` commands.
//!
//! Every `/start` sender is registered in the shared store; the follow-up
//! scheduler notifies them once the eligibility window has passed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use followup_bot::channel::telegram::TelegramClient;
use followup_bot::config::{ChannelKind, GlobalConfig};
use followup_bot::engine::clock::SystemClock;
use followup_bot::persistence::db;
use followup_bot::persistence::entity_repo::EntityRepo;
use followup_bot::responder::{join_responder, CommandResponder};
use followup_bot::{AppError, Result};

/// Headroom on top of the long-poll timeout before a request is abandoned.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    name = "followup-bot-responder",
    about = "Telegram /start responder for followup-bot",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file shared with `followup-bot`.
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config
        .load_credentials_for(ChannelKind::Telegram)
        .await?;

    let request_timeout =
        Duration::from_secs(config.responder.long_poll_seconds) + LONG_POLL_GRACE;
    let client = TelegramClient::new(&config.telegram, request_timeout)?;

    let db = Arc::new(db::connect(&config.database_url, config.store_timeout()).await?);
    info!("database connected");

    let responder = CommandResponder::new(
        client,
        EntityRepo::new(db),
        Arc::new(SystemClock),
        config.responder.clone(),
    );

    let ct = CancellationToken::new();
    let handle = tokio::spawn(responder.run(ct.clone()));

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::Io(format!("failed to listen for ctrl-c: {err}")))?;
    info!("shutdown signal received");
    ct.cancel();
    join_responder(handle).await?;

    Ok(())
}
