//! Messaging channels implementing the engine's [`Notifier`] capability.

pub mod slack;
pub mod telegram;

use std::sync::Arc;

use crate::config::ChannelKind;
use crate::engine::Notifier;
use crate::{GlobalConfig, Result};

/// Build the notifier selected by `config.channel`.
///
/// Credentials must already be loaded.
///
/// # Errors
///
/// Returns `AppError::Config` if the credential is missing or the HTTP
/// client cannot be created.
pub fn build_notifier(config: &GlobalConfig) -> Result<Arc<dyn Notifier>> {
    match config.channel {
        ChannelKind::Telegram => {
            let client = telegram::TelegramClient::new(&config.telegram, config.notifier_timeout())?;
            Ok(Arc::new(telegram::TelegramNotifier::new(client)))
        }
        ChannelKind::Slack => Ok(Arc::new(slack::SlackNotifier::new(&config.slack)?)),
    }
}
