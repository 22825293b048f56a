//! Companion `/start` responder.
//!
//! Long-polls Telegram for commands, registers each `/start` sender as an
//! entity in the shared store and replies with a fixed welcome message. The
//! entity row is what the follow-up engine later polls for.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::channel::telegram::{
    ChatTarget, InlineKeyboardButton, InlineKeyboardMarkup, SendMessageRequest, TelegramClient,
    TelegramUpdate, WebAppInfo,
};
use crate::config::ResponderConfig;
use crate::engine::clock::Clock;
use crate::engine::DeliveryOutcome;
use crate::models::recipient::RecipientId;
use crate::persistence::entity_repo::EntityRepo;
use crate::{AppError, Result};

/// A parsed `/start` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCommand {
    /// Chat to reply to and register.
    pub chat_id: i64,
    /// Sender's first name, kept for operators reading the store.
    pub display_name: Option<String>,
}

/// Extract a `/start` command from an update.
///
/// Accepts `/start`, `/start@botname` and `/start <payload>`. Messages from
/// bots and non-text messages are ignored.
#[must_use]
pub fn parse_start(update: &TelegramUpdate) -> Option<StartCommand> {
    let message = update.message.as_ref()?;
    let text = message.text.as_deref()?;
    if message.from.as_ref().is_some_and(|from| from.is_bot) {
        return None;
    }

    let command = text.split_whitespace().next()?;
    let command = command.split('@').next().unwrap_or(command);
    if command != "/start" {
        return None;
    }

    Some(StartCommand {
        chat_id: message.chat.id,
        display_name: message.from.as_ref().map(|from| from.first_name.clone()),
    })
}

/// Inline keyboard with a single web-app button, when a URL is configured.
#[must_use]
pub fn start_keyboard(config: &ResponderConfig) -> Option<InlineKeyboardMarkup> {
    let url = config.web_app_url.as_deref()?.trim();
    if url.is_empty() {
        return None;
    }
    Some(InlineKeyboardMarkup {
        inline_keyboard: vec![vec![InlineKeyboardButton {
            text: config.button_text.clone(),
            web_app: Some(WebAppInfo {
                url: url.to_owned(),
            }),
        }]],
    })
}

/// Record the sender as an entity; `false` when already registered.
///
/// # Errors
///
/// Returns the store error if the insert fails.
pub async fn register_start(
    entities: &EntityRepo,
    command: &StartCommand,
    now: DateTime<Utc>,
) -> Result<bool> {
    let recipient = RecipientId::from(command.chat_id);
    entities
        .register(&recipient, command.display_name.as_deref(), now)
        .await
}

/// Telegram long-poll loop answering `/start`.
pub struct CommandResponder {
    client: TelegramClient,
    entities: EntityRepo,
    clock: Arc<dyn Clock>,
    config: ResponderConfig,
    offset: Option<i64>,
}

impl CommandResponder {
    /// Wire the responder.
    #[must_use]
    pub fn new(
        client: TelegramClient,
        entities: EntityRepo,
        clock: Arc<dyn Clock>,
        config: ResponderConfig,
    ) -> Self {
        Self {
            client,
            entities,
            clock,
            config,
            offset: None,
        }
    }

    /// Register and answer one update. Returns whether a reply was sent.
    ///
    /// A failed registration is logged and the reply still goes out.
    ///
    /// # Errors
    ///
    /// Returns the channel error if the reply cannot be sent.
    pub async fn handle_update(&self, update: &TelegramUpdate) -> Result<bool> {
        let Some(command) = parse_start(update) else {
            return Ok(false);
        };

        match register_start(&self.entities, &command, self.clock.now()).await {
            Ok(true) => info!(chat_id = command.chat_id, "registered new entity"),
            Ok(false) => info!(chat_id = command.chat_id, "entity already registered"),
            Err(err) => error!(chat_id = command.chat_id, %err, "failed to register entity"),
        }

        let request = SendMessageRequest::new(ChatTarget::Id(command.chat_id), &self.config.reply_text)
            .with_keyboard(start_keyboard(&self.config));
        match self.client.send_message(&request).await? {
            DeliveryOutcome::Delivered => Ok(true),
            DeliveryOutcome::Failed(reason) => {
                warn!(chat_id = command.chat_id, %reason, "welcome reply refused");
                Ok(false)
            }
            DeliveryOutcome::RateLimited { retry_after } => {
                warn!(chat_id = command.chat_id, ?retry_after, "welcome reply rate limited");
                Ok(false)
            }
        }
    }

    /// Fetch and handle one batch of updates; returns how many were read.
    ///
    /// The offset advances past every update before it is handled, so a
    /// failing reply is never redelivered.
    ///
    /// # Errors
    ///
    /// Returns the channel error if `getUpdates` fails.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let updates = self
            .client
            .get_updates(self.offset, self.config.long_poll_seconds)
            .await?;

        for update in &updates {
            self.offset = Some(update.update_id + 1);
            if let Err(err) = self.handle_update(update).await {
                warn!(update_id = update.update_id, %err, "failed to handle update");
            }
        }

        Ok(updates.len())
    }

    /// Poll until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let idle_pause = Duration::from_millis(self.config.idle_pause_millis);
        let error_backoff = Duration::from_secs(self.config.error_backoff_seconds);
        info!("command responder started");

        loop {
            let pause = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.poll_once() => match result {
                    Ok(_) => idle_pause,
                    Err(err) => {
                        error!(%err, "telegram polling failed");
                        error_backoff
                    }
                },
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }

        info!("command responder shutting down");
    }
}

/// Wait for a spawned responder loop to finish.
///
/// # Errors
///
/// Returns `AppError::Io` if the task panicked or was cancelled by the
/// runtime instead of returning.
pub async fn join_responder(handle: JoinHandle<()>) -> Result<()> {
    handle.await.map_err(|err| {
        error!(%err, "command responder task failed");
        AppError::Io(format!("responder task failed: {err}"))
    })
}
