//! SMS notification channel backed by the Twilio Messages REST API.
//!
//! Sends `POST {api_base_url}/2010-04-01/Accounts/{sid}/Messages.json` with
//! basic auth and a form body. A non-2xx reply carries Twilio's JSON error
//! object (`code`, `message`), which is surfaced as a rejection.

use std::time::Duration;

use async_trait::async_trait;
use proto::{ChannelError, Outcome, Recipient};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapter::{NotificationChannel, install_rustls_provider, join_subject, settle};

const TWILIO_API_BASE_URL: &str = "https://api.twilio.com";

/// SMS channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Twilio account SID.
    #[serde(default)]
    pub account_sid: String,
    /// Twilio auth token.
    #[serde(default)]
    pub auth_token: String,
    /// Sender phone number.
    #[serde(default)]
    pub from_number: String,
    /// API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-request timeout.
    #[serde(default = "crate::default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base_url() -> String {
    TWILIO_API_BASE_URL.to_string()
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            api_base_url: default_api_base_url(),
            timeout_secs: crate::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Successful message creation reply.
#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

/// Twilio error reply.
#[derive(Debug, Default, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// Thin Twilio REST client, built once and reused.
struct TwilioClient {
    http: reqwest::Client,
    messages_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioClient {
    fn new(config: &SmsConfig) -> Option<Self> {
        let credentials = [&config.account_sid, &config.auth_token, &config.from_number];
        if credentials.iter().any(|v| v.trim().is_empty()) {
            warn!("Twilio credentials not found; SMS channel disabled");
            return None;
        }

        install_rustls_provider();
        let http = match reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
        {
            Ok(http) => http,
            Err(e) => {
                warn!("Failed to build Twilio HTTP client: {e}");
                return None;
            }
        };

        debug!("Twilio client initialized");
        Some(Self {
            http,
            messages_url: format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                config.api_base_url.trim_end_matches('/'),
                config.account_sid
            ),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        })
    }

    /// Creates a message and returns its SID.
    async fn create_message(&self, to: &str, body: &str) -> Result<String, ChannelError> {
        let response = self
            .http
            .post(&self.messages_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| ChannelError::Transport(format!("Network error: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let resource: MessageResource = response.json().await.map_err(|e| {
                ChannelError::Transport(format!("Invalid Twilio response: {e}"))
            })?;
            return Ok(resource.sid);
        }

        let error: TwilioErrorBody = response.json().await.unwrap_or_default();
        let code = error.code.unwrap_or_else(|| i64::from(status.as_u16()));
        let message = error
            .message
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
        Err(ChannelError::Rejected(format!("Twilio error {code}: {message}")))
    }
}

/// SMS notification channel.
pub struct SmsChannel {
    client: Option<TwilioClient>,
}

impl SmsChannel {
    /// Create a new SMS channel. The client is absent without credentials.
    pub fn new(config: SmsConfig) -> Self {
        Self {
            client: TwilioClient::new(&config),
        }
    }

    /// Returns `true` when a Twilio client is available.
    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    async fn attempt(
        &self,
        recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<String, ChannelError> {
        let client = self.client.as_ref().ok_or_else(|| {
            ChannelError::NotApplicable("Twilio client not configured".to_string())
        })?;
        let phone = recipient
            .phone_number()
            .ok_or_else(|| ChannelError::NotApplicable("no phone number".to_string()))?;

        debug!("Preparing to send SMS to {phone}");
        let sid = client
            .create_message(phone, &join_subject(subject, message))
            .await?;

        Ok(format!("to {phone} (SID: {sid})"))
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn send(&self, recipient: &Recipient, subject: &str, message: &str) -> Outcome {
        let result = self.attempt(recipient, subject, message).await;
        settle(self.name(), recipient, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> SmsConfig {
        SmsConfig {
            account_sid: "AC123".to_string(),
            auth_token: "token".to_string(),
            from_number: "+15550001111".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn sms_config_default_points_at_twilio() {
        let config = SmsConfig::default();
        assert_eq!(config.api_base_url, "https://api.twilio.com");
        assert_eq!(config.timeout_secs, 10);
        assert!(!SmsChannel::new(config).is_configured());
    }

    #[test]
    fn messages_url_is_scoped_to_account() {
        let client = TwilioClient::new(&SmsConfig {
            api_base_url: "http://127.0.0.1:9/".to_string(),
            ..configured()
        })
        .expect("client");
        assert_eq!(
            client.messages_url,
            "http://127.0.0.1:9/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[tokio::test]
    async fn missing_client_is_checked_before_phone() {
        let channel = SmsChannel::new(SmsConfig::default());
        let outcome = channel.send(&Recipient::new("1", "alice"), "s", "m").await;
        assert_eq!(
            outcome,
            Outcome::failure(ChannelError::NotApplicable(
                "Twilio client not configured".into()
            ))
        );
    }

    #[tokio::test]
    async fn recipient_without_phone_is_not_applicable() {
        let channel = SmsChannel::new(configured());
        assert_eq!(channel.name(), "sms");
        let outcome = channel
            .send(&Recipient::new("1", "alice").with_email("a@example.com"), "s", "m")
            .await;
        assert_eq!(
            outcome,
            Outcome::failure(ChannelError::NotApplicable("no phone number".into()))
        );
    }
}
