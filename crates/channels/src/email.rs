//! Email notification channel using SMTP.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use proto::{ChannelError, Outcome, Recipient};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapter::{NotificationChannel, install_rustls_provider, settle};

/// Email channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP server host.
    #[serde(default)]
    pub smtp_host: String,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// SMTP username.
    #[serde(default)]
    pub username: String,
    /// SMTP password.
    #[serde(default)]
    pub password: String,
    /// Sender address.
    #[serde(default)]
    pub from_address: String,
    /// Upgrade the connection with STARTTLS.
    #[serde(default = "default_starttls")]
    pub starttls: bool,
    /// SMTP command timeout.
    #[serde(default = "crate::default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            starttls: default_starttls(),
            timeout_secs: crate::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl EmailConfig {
    /// Host and credentials are all present.
    pub fn is_configured(&self) -> bool {
        [&self.smtp_host, &self.username, &self.password]
            .iter()
            .all(|v| !v.trim().is_empty())
    }
}

/// Email notification channel.
pub struct EmailChannel {
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from_address: String,
}

impl EmailChannel {
    /// Create a new Email channel. The transport is absent when SMTP settings
    /// are incomplete.
    pub fn new(config: EmailConfig) -> Self {
        let mailer = if config.is_configured() {
            build_mailer(&config)
        } else {
            warn!("Email settings not configured; email channel disabled");
            None
        };
        Self {
            mailer,
            from_address: config.from_address,
        }
    }

    /// Returns `true` when an SMTP transport is available.
    pub fn is_configured(&self) -> bool {
        self.mailer.is_some()
    }

    async fn attempt(
        &self,
        recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<String, ChannelError> {
        let address = recipient
            .email()
            .ok_or_else(|| ChannelError::NotApplicable("no email address".to_string()))?;
        let mailer = self.mailer.as_ref().ok_or_else(|| {
            ChannelError::NotApplicable("email settings not configured".to_string())
        })?;

        let from_address = &self.from_address;
        let from: Mailbox = from_address.parse().map_err(|e| {
            ChannelError::NotApplicable(format!("invalid from address '{from_address}': {e}"))
        })?;
        let to: Mailbox = address.parse().map_err(|e| {
            ChannelError::Rejected(format!("invalid email address '{address}': {e}"))
        })?;
        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.to_string())
            .map_err(|e| ChannelError::Rejected(format!("failed to build email: {e}")))?;

        debug!("Preparing to send email to {address}");
        mailer.send(email).await.map_err(classify_smtp_error)?;

        Ok(format!("to {address}"))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, recipient: &Recipient, subject: &str, message: &str) -> Outcome {
        let result = self.attempt(recipient, subject, message).await;
        settle(self.name(), recipient, result)
    }
}

fn build_mailer(config: &EmailConfig) -> Option<AsyncSmtpTransport<Tokio1Executor>> {
    let host = config.smtp_host.trim();
    let builder = if config.starttls {
        install_rustls_provider();
        match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host) {
            Ok(builder) => builder,
            Err(e) => {
                warn!("Invalid SMTP relay '{host}': {e}");
                return None;
            }
        }
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
    };

    let credentials = Credentials::new(config.username.clone(), config.password.clone());
    Some(
        builder
            .port(config.smtp_port)
            .credentials(credentials)
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build(),
    )
}

/// Negative SMTP replies are refusals; everything else is transport.
fn classify_smtp_error(err: lettre::transport::smtp::Error) -> ChannelError {
    if err.is_permanent() || err.is_transient() {
        ChannelError::Rejected(format!("SMTP server refused message: {err}"))
    } else {
        ChannelError::Transport(format!("SMTP error: {err}"))
    }
}
