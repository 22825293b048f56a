//! Slack Web API notifier: posts the follow-up into the recipient's DM.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiToken, SlackApiTokenType, SlackApiTokenValue,
    SlackChannelId, SlackClient, SlackClientHyperHttpsConnector, SlackMessageContent,
};

use crate::config::SlackConfig;
use crate::engine::{DeliveryOutcome, Notifier};
use crate::models::recipient::RecipientId;
use crate::{AppError, Result};

/// Slack API error codes that indicate a credential problem.
const AUTH_ERROR_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "missing_scope",
];

/// Map a Slack client error to a delivery outcome.
///
/// # Errors
///
/// Returns `AppError::Unauthorized` for credential failures and
/// `AppError::Notifier` for HTTP or protocol faults.
pub fn classify_slack_error(err: &SlackClientError) -> Result<DeliveryOutcome> {
    match err {
        SlackClientError::ApiError(api) if AUTH_ERROR_CODES.contains(&api.code.as_str()) => {
            Err(AppError::Unauthorized(format!("slack rejected token: {}", api.code)))
        }
        SlackClientError::ApiError(api) => Ok(DeliveryOutcome::Failed(api.code.clone())),
        SlackClientError::RateLimitError(rate) => Ok(DeliveryOutcome::RateLimited {
            retry_after: rate.retry_after.unwrap_or(Duration::from_secs(1)),
        }),
        other => Err(AppError::Notifier(format!("slack post failed: {other}"))),
    }
}

fn direct_message(recipient: &RecipientId, text: &str) -> SlackApiChatPostMessageRequest {
    let content = SlackMessageContent {
        text: Some(text.to_owned()),
        markdown_text: None,
        blocks: None,
        attachments: None,
        upload: None,
        files: None,
        reactions: None,
        metadata: None,
    };

    SlackApiChatPostMessageRequest {
        channel: SlackChannelId(recipient.as_str().to_owned()),
        content,
        as_user: None,
        icon_emoji: None,
        icon_url: None,
        link_names: Some(true),
        parse: None,
        thread_ts: None,
        username: None,
        reply_broadcast: None,
        unfurl_links: None,
        unfurl_media: None,
    }
}

/// [`Notifier`] that posts follow-ups through the Slack bot token.
pub struct SlackNotifier {
    client: SlackClient<SlackClientHyperHttpsConnector>,
    bot_token: SlackApiToken,
}

impl SlackNotifier {
    /// Create the HTTPS client for the configured bot token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the token is missing or the connector
    /// cannot be created.
    pub fn new(config: &SlackConfig) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(AppError::Config("slack bot token is not loaded".into()));
        }
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Config(format!("failed to init slack connector: {err}")))?;
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };

        Ok(Self {
            client: SlackClient::new(connector),
            bot_token,
        })
    }
}

impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn send<'a>(
        &'a self,
        recipient: &'a RecipientId,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let request = direct_message(recipient, text);
            let session = self.client.open_session(&self.bot_token);
            match session.chat_post_message(&request).await {
                Ok(_) => Ok(DeliveryOutcome::Delivered),
                Err(err) => classify_slack_error(&err),
            }
        })
    }
}
