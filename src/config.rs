//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::engine::EngineSettings;
use crate::{AppError, Result};

/// Keychain service name used for channel credentials.
pub const KEYRING_SERVICE: &str = "followup-bot";

/// Environment variable that overrides `database_url` from the TOML file.
pub const DATABASE_URL_ENV: &str = "FOLLOWUP_DATABASE_URL";

/// Messaging channel used to deliver follow-up notifications.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Telegram Bot API (`sendMessage`).
    #[default]
    Telegram,
    /// Slack Web API (`chat.postMessage` into the recipient's DM).
    Slack,
}

impl ChannelKind {
    /// Keychain key and environment variable holding the bot credential.
    #[must_use]
    pub fn credential_keys(self) -> (&'static str, &'static str) {
        match self {
            Self::Telegram => ("telegram_bot_token", "TELEGRAM_BOT_TOKEN"),
            Self::Slack => ("slack_bot_token", "SLACK_BOT_TOKEN"),
        }
    }
}

/// Eligibility window, poll cadence and pacing settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimingConfig {
    /// Minimum age of an entity before it becomes eligible.
    #[serde(default = "default_eligibility_delay")]
    pub eligibility_delay_seconds: u64,
    /// Regular wait between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Wait used instead of the poll interval when the store is unreachable.
    #[serde(default = "default_store_backoff")]
    pub store_unavailable_backoff_seconds: u64,
    /// Upper bound of the random jitter added to the store backoff.
    #[serde(default = "default_jitter_millis")]
    pub backoff_jitter_millis: u64,
    /// Pause between two consecutive sends inside one cycle.
    #[serde(default = "default_pacing_millis")]
    pub send_pacing_millis: u64,
    /// Consecutive unreachable cycles before failures are logged as errors.
    #[serde(default = "default_escalation_after")]
    pub unavailable_escalation_after: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            eligibility_delay_seconds: default_eligibility_delay(),
            poll_interval_seconds: default_poll_interval(),
            store_unavailable_backoff_seconds: default_store_backoff(),
            backoff_jitter_millis: default_jitter_millis(),
            send_pacing_millis: default_pacing_millis(),
            unavailable_escalation_after: default_escalation_after(),
        }
    }
}

fn default_eligibility_delay() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

fn default_store_backoff() -> u64 {
    15
}

fn default_jitter_millis() -> u64 {
    1000
}

fn default_pacing_millis() -> u64 {
    1000
}

fn default_escalation_after() -> u32 {
    5
}

/// Bounds applied to every store and notifier call.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Store connect / busy / acquire timeout.
    #[serde(default = "default_call_timeout")]
    pub store_seconds: u64,
    /// Per-send notifier timeout.
    #[serde(default = "default_call_timeout")]
    pub notifier_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store_seconds: default_call_timeout(),
            notifier_seconds: default_call_timeout(),
        }
    }
}

fn default_call_timeout() -> u64 {
    5
}

/// Telegram Bot API settings.
///
/// The bot token is loaded at runtime via OS keychain or environment
/// variables, never from the TOML config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TelegramConfig {
    /// Base URL of the Bot API.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Bot token (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            bot_token: String::new(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

/// Slack Web API settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// Companion `/start` responder settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResponderConfig {
    /// Reply sent for every `/start` command.
    #[serde(default = "default_reply_text")]
    pub reply_text: String,
    /// Label of the inline web-app button.
    #[serde(default = "default_button_text")]
    pub button_text: String,
    /// Web app opened by the inline button; no button when absent.
    #[serde(default)]
    pub web_app_url: Option<String>,
    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_long_poll")]
    pub long_poll_seconds: u64,
    /// Pause between two successful polls.
    #[serde(default = "default_idle_pause")]
    pub idle_pause_millis: u64,
    /// Pause after a failed poll.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            reply_text: default_reply_text(),
            button_text: default_button_text(),
            web_app_url: None,
            long_poll_seconds: default_long_poll(),
            idle_pause_millis: default_idle_pause(),
            error_backoff_seconds: default_error_backoff(),
        }
    }
}

fn default_reply_text() -> String {
    "Welcome! Click the button below to open the web app:".into()
}

fn default_button_text() -> String {
    "Open Web App".into()
}

fn default_long_poll() -> u64 {
    30
}

fn default_idle_pause() -> u64 {
    1000
}

fn default_error_backoff() -> u64 {
    5
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` connection string shared with the responder.
    #[serde(default)]
    pub database_url: String,
    /// Channel used for follow-up delivery.
    #[serde(default)]
    pub channel: ChannelKind,
    /// The single follow-up message sent to every eligible recipient.
    pub message_text: String,
    /// Eligibility and poll cadence settings.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Store and notifier call bounds.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Telegram connectivity settings.
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
    /// Companion responder settings.
    #[serde(default)]
    pub responder: ResponderConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string, apply environment overrides
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        if let Ok(url) = env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.database_url = url;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Load the bot credential for the configured channel from the OS
    /// keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env var provide
    /// a non-empty token.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.load_credentials_for(self.channel).await
    }

    /// Load the credential for an explicit channel, regardless of `channel`.
    ///
    /// The responder always talks to Telegram even when follow-ups go
    /// through Slack.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the credential cannot be found.
    pub async fn load_credentials_for(&mut self, channel: ChannelKind) -> Result<()> {
        let (keyring_key, env_key) = channel.credential_keys();
        let token = load_credential(keyring_key, env_key).await?;
        match channel {
            ChannelKind::Telegram => self.telegram.bot_token = token,
            ChannelKind::Slack => self.slack.bot_token = token,
        }
        Ok(())
    }

    /// Store call bound.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.store_seconds)
    }

    /// Notifier call bound.
    #[must_use]
    pub fn notifier_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.notifier_seconds)
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        let delay_secs = i64::try_from(self.timing.eligibility_delay_seconds).unwrap_or(i64::MAX);
        EngineSettings {
            eligibility_delay: chrono::Duration::seconds(delay_secs),
            poll_interval: Duration::from_secs(self.timing.poll_interval_seconds),
            store_unavailable_backoff: Duration::from_secs(
                self.timing.store_unavailable_backoff_seconds,
            ),
            backoff_jitter: Duration::from_millis(self.timing.backoff_jitter_millis),
            send_pacing: Duration::from_millis(self.timing.send_pacing_millis),
            send_timeout: self.notifier_timeout(),
            unavailable_escalation_after: self.timing.unavailable_escalation_after,
            message_text: self.message_text.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(AppError::Config(format!(
                "database_url must be set in the config file or {DATABASE_URL_ENV}"
            )));
        }

        if self.message_text.trim().is_empty() {
            return Err(AppError::Config("message_text must not be empty".into()));
        }

        // Keeps `now - delay` well inside chrono's representable range.
        if self.timing.eligibility_delay_seconds > MAX_ELIGIBILITY_DELAY_SECONDS {
            return Err(AppError::Config(
                "eligibility_delay_seconds must not exceed one year".into(),
            ));
        }

        if self.timing.poll_interval_seconds == 0 {
            return Err(AppError::Config(
                "poll_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.timing.store_unavailable_backoff_seconds == 0 {
            return Err(AppError::Config(
                "store_unavailable_backoff_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.store_seconds == 0 || self.timeouts.notifier_seconds == 0 {
            return Err(AppError::Config("timeouts must be greater than zero".into()));
        }

        if self.channel == ChannelKind::Telegram && self.telegram.api_base.trim().is_empty() {
            return Err(AppError::Config("telegram.api_base must not be empty".into()));
        }

        Ok(())
    }
}

const MAX_ELIGIBILITY_DELAY_SECONDS: u64 = 365 * 24 * 3600;

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // Try OS keychain first via spawn_blocking (keyring is synchronous I/O).
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}
