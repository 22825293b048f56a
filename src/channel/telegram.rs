//! Telegram Bot API client: `sendMessage` for follow-ups and `getUpdates`
//! long polling for the companion responder.
//!
//! The bot token is part of every request URL, so transport errors are
//! always stripped of their URL before being logged or returned.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TelegramConfig;
use crate::engine::{DeliveryOutcome, Notifier};
use crate::models::recipient::RecipientId;
use crate::{AppError, Result};

/// Parse mode used for every outgoing message.
pub const PARSE_MODE: &str = "HTML";

/// Generic Bot API response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramApiResponse<T> {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Payload on success.
    pub result: Option<T>,
    /// Human-readable error.
    pub description: Option<String>,
    /// Error code, mirrors the HTTP status.
    pub error_code: Option<i64>,
    /// Extra error information such as `retry_after`.
    pub parameters: Option<ResponseParameters>,
}

/// Additional error details.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseParameters {
    /// Seconds to wait before repeating a rate-limited request.
    pub retry_after: Option<u64>,
}

/// Incoming update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    /// Monotonic update identifier.
    pub update_id: i64,
    /// New incoming message, if this update carries one.
    pub message: Option<TelegramMessage>,
}

/// Message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    /// Message identifier inside the chat.
    pub message_id: i64,
    /// Sender, absent for channel posts.
    pub from: Option<TelegramUser>,
    /// Conversation the message belongs to.
    pub chat: TelegramChat,
    /// Text body.
    pub text: Option<String>,
}

/// Telegram user or bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    /// User identifier.
    pub id: i64,
    /// Whether the sender is a bot.
    pub is_bot: bool,
    /// First name.
    pub first_name: String,
    /// Username without `@`.
    pub username: Option<String>,
}

/// Chat descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    /// Chat identifier.
    pub id: i64,
    /// `private`, `group`, `supergroup` or `channel`.
    #[serde(rename = "type")]
    pub chat_type: String,
}

/// Target of a `sendMessage` call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChatTarget {
    /// Numeric chat id.
    Id(i64),
    /// `@channelusername`.
    Username(String),
}

impl From<&RecipientId> for ChatTarget {
    fn from(recipient: &RecipientId) -> Self {
        recipient
            .as_i64()
            .map_or_else(|| Self::Username(recipient.as_str().to_owned()), Self::Id)
    }
}

/// Inline keyboard attached to a message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardMarkup {
    /// Rows of buttons.
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// A single inline keyboard button.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardButton {
    /// Button label.
    pub text: String,
    /// Web app launched by the button.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_app: Option<WebAppInfo>,
}

/// Web app descriptor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebAppInfo {
    /// HTTPS URL of the web app.
    pub url: String,
}

/// `sendMessage` request body.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    /// Destination chat.
    pub chat_id: ChatTarget,
    /// Message text.
    pub text: String,
    /// Always [`PARSE_MODE`].
    pub parse_mode: &'static str,
    /// Optional inline keyboard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

impl SendMessageRequest {
    /// Plain message to `chat_id`.
    pub fn new(chat_id: ChatTarget, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: PARSE_MODE,
            reply_markup: None,
        }
    }

    /// Attach an inline keyboard.
    #[must_use]
    pub fn with_keyboard(mut self, keyboard: Option<InlineKeyboardMarkup>) -> Self {
        self.reply_markup = keyboard;
        self
    }
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

/// Map a `sendMessage` response to a delivery outcome.
///
/// `401`/`404` mean the token is wrong and affect every recipient, so they
/// are errors. `400`/`403` are per-chat refusals (blocked bot, chat not
/// found). `5xx` is a transport fault.
///
/// # Errors
///
/// Returns `AppError::Unauthorized` for credential failures and
/// `AppError::Notifier` for server-side faults.
pub fn classify_send_response(
    http_status: u16,
    body: &TelegramApiResponse<serde_json::Value>,
) -> Result<DeliveryOutcome> {
    if body.ok && (200..300).contains(&http_status) {
        return Ok(DeliveryOutcome::Delivered);
    }

    let description = body
        .description
        .clone()
        .unwrap_or_else(|| format!("telegram returned status {http_status}"));
    let code = body.error_code.unwrap_or_else(|| i64::from(http_status));

    match code {
        401 | 404 => Err(AppError::Unauthorized(description)),
        429 => {
            let retry_after = body
                .parameters
                .as_ref()
                .and_then(|p| p.retry_after)
                .unwrap_or(1);
            Ok(DeliveryOutcome::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            })
        }
        code if code >= 500 => Err(AppError::Notifier(format!(
            "telegram server error {code}: {description}"
        ))),
        _ => Ok(DeliveryOutcome::Failed(description)),
    }
}

/// Thin Bot API client over `reqwest`.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    /// Build a client whose every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the bot token is empty or the HTTP
    /// client cannot be built.
    pub fn new(config: &TelegramConfig, timeout: Duration) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(AppError::Config("telegram bot token is not loaded".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            token: config.bot_token.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    /// Call `sendMessage` and classify the response.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notifier` on transport failure or an unreadable
    /// response, `AppError::Unauthorized` on credential failure.
    pub async fn send_message(&self, request: &SendMessageRequest) -> Result<DeliveryOutcome> {
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(request)
            .send()
            .await
            .map_err(|err| {
                AppError::Notifier(format!("sendMessage request failed: {}", err.without_url()))
            })?;

        let status = response.status().as_u16();
        let body: TelegramApiResponse<serde_json::Value> = response.json().await.map_err(|err| {
            AppError::Notifier(format!(
                "invalid sendMessage response (status {status}): {}",
                err.without_url()
            ))
        })?;

        classify_send_response(status, &body)
    }

    /// Long-poll `getUpdates` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notifier` on transport failure or an `ok: false`
    /// body, `AppError::Unauthorized` when the token is rejected.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        long_poll_seconds: u64,
    ) -> Result<Vec<TelegramUpdate>> {
        let request = GetUpdatesRequest {
            offset,
            timeout: long_poll_seconds,
            allowed_updates: ["message"],
        };
        let response = self
            .http
            .post(self.method_url("getUpdates"))
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                AppError::Notifier(format!("getUpdates request failed: {}", err.without_url()))
            })?;

        let status = response.status().as_u16();
        let body: TelegramApiResponse<Vec<TelegramUpdate>> =
            response.json().await.map_err(|err| {
                AppError::Notifier(format!(
                    "invalid getUpdates response (status {status}): {}",
                    err.without_url()
                ))
            })?;

        if !body.ok {
            let description = body.description.unwrap_or_default();
            return match body.error_code {
                Some(401 | 404) => Err(AppError::Unauthorized(description)),
                _ => Err(AppError::Notifier(format!("getUpdates failed: {description}"))),
            };
        }

        let updates = body.result.unwrap_or_default();
        debug!(count = updates.len(), "received telegram updates");
        Ok(updates)
    }
}

/// [`Notifier`] that delivers follow-ups as Telegram messages.
pub struct TelegramNotifier {
    client: TelegramClient,
}

impl TelegramNotifier {
    /// Wrap a configured client.
    #[must_use]
    pub fn new(client: TelegramClient) -> Self {
        Self { client }
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send<'a>(
        &'a self,
        recipient: &'a RecipientId,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let request = SendMessageRequest::new(ChatTarget::from(recipient), text);
            self.client.send_message(&request).await
        })
    }
}
