#![forbid(unsafe_code)]

//! `followup-bot`: delayed one-time follow-up notifier.
//!
//! Bootstraps configuration and credentials, connects to the shared store,
//! and runs the poll scheduler until SIGINT/SIGTERM. The `ledger`
//! subcommand prints recorded attempts for manual follow-up.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use followup_bot::channel;
use followup_bot::config::GlobalConfig;
use followup_bot::engine::clock::SystemClock;
use followup_bot::engine::scheduler::PollScheduler;
use followup_bot::models::ledger::DeliveryStatus;
use followup_bot::persistence::db::{self, Database};
use followup_bot::persistence::ledger_repo::LedgerRepo;
use followup_bot::persistence::store::SqliteStore;
use followup_bot::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum StatusFilter {
    Success,
    Failed,
}

impl From<StatusFilter> for DeliveryStatus {
    fn from(value: StatusFilter) -> Self {
        match value {
            StatusFilter::Success => Self::Success,
            StatusFilter::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the poll scheduler (default).
    Run,
    /// Print ledger entries as JSON lines.
    Ledger {
        /// Only print entries with this status.
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
    },
}

#[derive(Debug, Parser)]
#[command(name = "followup-bot", about = "Delayed one-time follow-up notifier", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(async move {
            let config = GlobalConfig::load_from_path(&args.config)?;
            match args.command.unwrap_or(Command::Run) {
                Command::Run => run(config).await,
                Command::Ledger { status } => print_ledger(&config, status.map(Into::into)).await,
            }
        })
}

async fn run(mut config: GlobalConfig) -> Result<()> {
    info!("followup-bot bootstrap");

    // ── Credentials and notifier: fail fast before the first cycle ──
    config.load_credentials().await?;
    let notifier = channel::build_notifier(&config)?;
    info!(channel = notifier.name(), "configuration loaded");

    let settings = config.engine_settings();
    let ct = CancellationToken::new();

    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    // ── Initialize database ─────────────────────────────
    let Some(db) = connect_with_backoff(&config, &ct).await? else {
        info!("followup-bot shut down before the store became reachable");
        return Ok(());
    };
    info!("database connected");

    // ── Run scheduler ───────────────────────────────────
    let store = Arc::new(SqliteStore::new(Arc::new(db)));
    let scheduler = PollScheduler::new(store, notifier, Arc::new(SystemClock), &settings);
    scheduler.run(ct.clone()).await;

    signal_handle.abort();
    info!("followup-bot shut down");
    Ok(())
}

/// Connect to the store, retrying on connectivity errors until it answers
/// or shutdown is requested. Invalid connection strings stay fatal.
async fn connect_with_backoff(
    config: &GlobalConfig,
    cancel: &CancellationToken,
) -> Result<Option<Database>> {
    let settings = config.engine_settings();
    loop {
        match db::connect(&config.database_url, config.store_timeout()).await {
            Ok(db) => return Ok(Some(db)),
            Err(err @ AppError::Config(_)) => return Err(err),
            Err(err) => {
                let delay = followup_bot::engine::backoff::jittered(
                    settings.store_unavailable_backoff,
                    settings.backoff_jitter,
                );
                warn!(%err, ?delay, "store unreachable at startup; retrying");
                tokio::select! {
                    () = cancel.cancelled() => return Ok(None),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn print_ledger(config: &GlobalConfig, status: Option<DeliveryStatus>) -> Result<()> {
    let db = Arc::new(db::connect(&config.database_url, config.store_timeout()).await?);
    let entries = LedgerRepo::new(db).list(status).await?;
    for entry in &entries {
        let line = serde_json::to_string(entry)
            .map_err(|err| AppError::Io(format!("failed to encode ledger entry: {err}")))?;
        println!("{line}");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
