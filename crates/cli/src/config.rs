use std::path::{Path, PathBuf};
use std::time::Duration;

use channels::ChannelsConfig;
use proto::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use worker::RetryPolicy;

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Delivery channel configuration.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Background retry budget and backoff.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Background worker sizing.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Database storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self {
            url: format!("{home}/.notify-relay/deliveries.db"),
        }
    }
}

/// Retry settings for background sends, in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub failure_delay_secs: u64,
    pub max_fault_retries: u32,
    pub fault_delay_secs: u64,
    pub backoff_factor: u32,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            failure_delay_secs: policy.failure_delay.as_secs(),
            max_fault_retries: policy.max_fault_retries,
            fault_delay_secs: policy.fault_delay.as_secs(),
            backoff_factor: policy.backoff_factor,
            max_delay_secs: policy.max_delay.as_secs(),
        }
    }
}

impl RetryConfig {
    /// Rejects settings that would hot-loop against a failing downstream.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::InvalidValue {
            field: format!("retry.{field}"),
            reason: reason.to_string(),
        };
        if self.failure_delay_secs == 0 {
            return Err(invalid("failure_delay_secs", "must be at least 1"));
        }
        if self.fault_delay_secs == 0 {
            return Err(invalid("fault_delay_secs", "must be at least 1"));
        }
        if self.backoff_factor == 0 {
            return Err(invalid("backoff_factor", "must be at least 1"));
        }
        if self.max_delay_secs < self.failure_delay_secs.max(self.fault_delay_secs) {
            return Err(invalid("max_delay_secs", "must not be below the base delays"));
        }
        Ok(())
    }

    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            failure_delay: Duration::from_secs(self.failure_delay_secs),
            max_fault_retries: self.max_fault_retries,
            fault_delay: Duration::from_secs(self.fault_delay_secs),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// Background worker config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Tasks run at once.
    pub concurrency: usize,
    /// Pending task buffer size.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 64,
        }
    }
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join("config.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home)
                .join(".notify-relay")
                .join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        config.apply_env_overrides()?;
        config.retry.validate()?;

        debug!(
            chat = !config.channels.chat.bot_token.is_empty(),
            email = config.channels.email.is_configured(),
            sms = !config.channels.sms.account_sid.is_empty(),
            database = %config.database.url,
            "Config loaded"
        );
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let chat = &mut self.channels.chat;
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            chat.bot_token = token;
        }

        let email = &mut self.channels.email;
        if let Ok(host) = std::env::var("EMAIL_HOST") {
            email.smtp_host = host;
        }
        if let Ok(port) = std::env::var("EMAIL_PORT") {
            email.smtp_port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: "EMAIL_PORT".to_string(),
                reason: format!("'{port}' is not a port number"),
            })?;
        }
        if let Ok(user) = std::env::var("EMAIL_HOST_USER") {
            email.username = user;
        }
        if let Ok(password) = std::env::var("EMAIL_HOST_PASSWORD") {
            email.password = password;
        }
        if let Ok(from) = std::env::var("DEFAULT_FROM_EMAIL") {
            email.from_address = from;
        }

        let sms = &mut self.channels.sms;
        if let Ok(sid) = std::env::var("TWILIO_ACCOUNT_SID") {
            sms.account_sid = sid;
        }
        if let Ok(token) = std::env::var("TWILIO_AUTH_TOKEN") {
            sms.auth_token = token;
        }
        if let Ok(number) = std::env::var("TWILIO_PHONE_NUMBER") {
            sms.from_number = number;
        }

        if let Ok(url) = std::env::var("NOTIFY_RELAY_DB") {
            self.database.url = url;
        }
        Ok(())
    }
}
