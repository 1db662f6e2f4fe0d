//! Fixed-priority channel chain.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    ChatChannel, ChatConfig, EmailChannel, EmailConfig, NotificationChannel, SmsChannel,
    SmsConfig,
};

/// Container for all channel configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Telegram chat-bot channel config.
    #[serde(default)]
    pub chat: ChatConfig,
    /// SMTP email channel config.
    #[serde(default)]
    pub email: EmailConfig,
    /// Twilio SMS channel config.
    #[serde(default)]
    pub sms: SmsConfig,
}

/// Builds the delivery chain in priority order: chat, email, SMS.
///
/// Unconfigured channels stay in the chain and fail as not applicable.
pub fn default_chain(config: &ChannelsConfig) -> Vec<Arc<dyn NotificationChannel>> {
    let chat = ChatChannel::new(config.chat.clone());
    let email = EmailChannel::new(config.email.clone());
    let sms = SmsChannel::new(config.sms.clone());
    info!(
        chat = chat.is_configured(),
        email = email.is_configured(),
        sms = sms.is_configured(),
        "Delivery chain built"
    );
    vec![Arc::new(chat), Arc::new(email), Arc::new(sms)]
}
