//! Telegram Bot API notification channel.

use std::time::Duration;

use async_trait::async_trait;
use proto::{ChannelError, Outcome, Recipient};
use serde::{Deserialize, Serialize};
use teloxide::{
    Bot, RequestError,
    payloads::SendMessageSetters,
    requests::Requester,
    types::{ChatId, ParseMode},
    utils::html,
};
use tracing::{debug, warn};

use crate::adapter::{NotificationChannel, install_rustls_provider, settle};

/// Chat-bot channel config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Telegram bot token. Empty disables the channel.
    #[serde(default)]
    pub bot_token: String,
    /// Bot API base URL override (defaults to `https://api.telegram.org`).
    #[serde(default)]
    pub api_url: Option<String>,
    /// Per-request timeout.
    #[serde(default = "crate::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: None,
            timeout_secs: crate::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Delivers notifications as Telegram bot messages.
pub struct ChatChannel {
    bot: Option<Bot>,
}

impl ChatChannel {
    /// Builds the channel. The bot client is absent when no token is configured.
    pub fn new(config: ChatConfig) -> Self {
        let token = config.bot_token.trim();
        if token.is_empty() {
            warn!("Telegram bot token not configured; chat channel disabled");
            return Self { bot: None };
        }

        install_rustls_provider();
        let client = match teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build Telegram HTTP client: {e}");
                return Self { bot: None };
            }
        };

        let mut bot = Bot::with_client(token, client);
        if let Some(api_url) = config.api_url.as_deref() {
            match reqwest::Url::parse(api_url) {
                Ok(url) => bot = bot.set_api_url(url),
                Err(e) => warn!("Ignoring invalid Telegram api_url '{api_url}': {e}"),
            }
        }
        Self { bot: Some(bot) }
    }

    /// Returns `true` when a bot client is available.
    pub fn is_configured(&self) -> bool {
        self.bot.is_some()
    }

    async fn attempt(
        &self,
        recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<String, ChannelError> {
        let raw_chat_id = recipient
            .chat_id()
            .ok_or_else(|| ChannelError::NotApplicable("no Telegram chat ID".to_string()))?;
        let bot = self.bot.as_ref().ok_or_else(|| {
            ChannelError::NotApplicable("Telegram bot token not configured".to_string())
        })?;
        let chat_id = parse_chat_id(raw_chat_id)?;

        debug!("Preparing to send Telegram message to chat {chat_id}");
        bot.send_message(ChatId(chat_id), format_text(subject, message))
            .parse_mode(ParseMode::Html)
            .await
            .map_err(classify_request_error)?;

        Ok(format!("to chat {chat_id}"))
    }
}

#[async_trait]
impl NotificationChannel for ChatChannel {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn send(&self, recipient: &Recipient, subject: &str, message: &str) -> Outcome {
        let result = self.attempt(recipient, subject, message).await;
        settle(self.name(), recipient, result)
    }
}

/// Parses a Telegram chat id, accepting an optional `telegram:` prefix.
fn parse_chat_id(raw: &str) -> Result<i64, ChannelError> {
    let id = raw.strip_prefix("telegram:").unwrap_or(raw);
    id.parse().map_err(|e| {
        ChannelError::NotApplicable(format!("invalid Telegram chat ID '{id}': {e}"))
    })
}

/// Renders the HTML message body with a bold subject line.
fn format_text(subject: &str, message: &str) -> String {
    if subject.is_empty() {
        html::escape(message)
    } else {
        format!("<b>{}</b>\n{}", html::escape(subject), html::escape(message))
    }
}

/// Splits Bot API refusals from transport failures.
fn classify_request_error(err: RequestError) -> ChannelError {
    match err {
        RequestError::Api(_) | RequestError::RetryAfter(_) | RequestError::MigrateToChatId(_) => {
            ChannelError::Rejected(format!("Telegram API: {err}"))
        }
        other => ChannelError::Transport(format!("Network error: {other}")),
    }
}
