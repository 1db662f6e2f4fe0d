//! Shared notification channel trait.

use std::sync::OnceLock;

use async_trait::async_trait;
use proto::{ChannelError, Outcome, Recipient, Severity};
use tracing::{debug, error, info, warn};

/// Trait for notification channels (chat bot, email, SMS, etc.)
///
/// `send` never fails with an error type: every transport or configuration
/// problem comes back as [`Outcome::Failure`].
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Stable lowercase channel name, persisted as `sent_via`.
    fn name(&self) -> &'static str;

    /// Attempt one delivery to `recipient`.
    async fn send(&self, recipient: &Recipient, subject: &str, message: &str) -> Outcome;
}

/// Converts an internal attempt result into an [`Outcome`], logging it at the
/// level its failure class deserves.
pub(crate) fn settle(
    channel: &'static str,
    recipient: &Recipient,
    result: Result<String, ChannelError>,
) -> Outcome {
    let user = &recipient.username;
    match &result {
        Ok(detail) => info!(channel, recipient = %user, "{channel} delivered {detail}"),
        Err(reason) => match reason.severity() {
            Severity::Info => info!(channel, recipient = %user, "{channel} skipped: {reason}"),
            Severity::Warn => warn!(channel, recipient = %user, "{channel} failed: {reason}"),
            Severity::Error => error!(channel, recipient = %user, "{channel} failed: {reason}"),
        },
    }
    Outcome::from(result)
}

/// Installs the ring rustls provider once per process.
pub fn install_rustls_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        if let Err(existing) = rustls::crypto::ring::default_provider().install_default() {
            debug!(existing_provider = ?existing, "rustls CryptoProvider already installed");
        }
    });
}

/// Prefixes the message with the subject on its own line.
pub(crate) fn join_subject(subject: &str, message: &str) -> String {
    if subject.is_empty() {
        message.to_string()
    } else {
        format!("{subject}\n{message}")
    }
}
