use thiserror::Error;

use crate::record::DeliveryStatus;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Database/migration error.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Channel delivery error.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Fallback engine error.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Task dispatch error.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Internal protocol type error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLx operation error.
    #[error("SQLx error: {0}")]
    Sqlx(String),

    /// Migration execution error.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Requested record was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record exists but is no longer pending.
    #[error("Record {0} is already terminal")]
    AlreadyTerminal(String),
}

/// Why a single channel attempt did not deliver.
///
/// Channels return these inside [`crate::Outcome::Failure`]; they never
/// propagate as raised errors past the channel boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Recipient lacks the contact field, or the channel lacks configuration.
    #[error("Not applicable: {0}")]
    NotApplicable(String),

    /// Network or API transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Downstream provider explicitly refused the message.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The channel broke its own contract (panicked inside `send`).
    #[error("Channel fault: {0}")]
    Fault(String),
}

/// Log level a channel failure is reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl ChannelError {
    /// Log level for this failure. Only `NotApplicable` is routine.
    pub fn severity(&self) -> Severity {
        match self {
            ChannelError::NotApplicable(_) => Severity::Info,
            ChannelError::Rejected(_) => Severity::Warn,
            ChannelError::Transport(_) | ChannelError::Fault(_) => Severity::Error,
        }
    }
}

/// Fallback engine errors.
///
/// Only persistence and contract problems surface here; channel failures are
/// absorbed into the delivery report.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Delivery record could not be created or updated.
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    /// Delivery record state machine violation.
    #[error("Record error: {0}")]
    Record(#[from] ProtoError),
}

/// Task dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The queue has been shut down.
    #[error("Task queue closed")]
    Closed,
}

/// Internal proto errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Invalid delivery status string value.
    #[error("Invalid delivery status: {0}")]
    InvalidStatus(String),

    /// A terminal record was asked to transition again.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}
