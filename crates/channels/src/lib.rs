//! Notification channel interfaces and built-in channel implementations.

pub mod adapter;
pub mod chain;
pub mod chat;
pub mod email;
pub mod sms;

/// Trait implemented by all notification channels.
pub use adapter::NotificationChannel;
/// Fixed-priority channel chain built from configuration.
pub use chain::{ChannelsConfig, default_chain};
/// Telegram Bot API channel.
pub use chat::{ChatChannel, ChatConfig};
/// SMTP email channel.
pub use email::{EmailChannel, EmailConfig};
/// Twilio SMS channel.
pub use sms::{SmsChannel, SmsConfig};

/// Default per-request timeout for channel transports.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub(crate) fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
