use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtoError;
use crate::recipient::RecipientId;

/// Unique identifier for a delivery record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    /// Creates a new random delivery identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the raw delivery identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeliveryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeliveryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a delivery record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Created, no channel has succeeded yet.
    Pending,
    /// Delivered through `sent_via`.
    Sent,
    /// Every channel failed.
    Failed,
}

impl DeliveryStatus {
    /// Returns `true` once the record can no longer change.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(ProtoError::InvalidStatus(other.to_string())),
        }
    }
}

/// Terminal field update applied to an existing record.
///
/// `status`, `sent_via` and `sent_at` always change together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryUpdate {
    /// Delivered through `channel` at `at`.
    Sent { channel: String, at: DateTime<Utc> },
    /// All channels exhausted at `at`.
    Failed { at: DateTime<Utc> },
}

impl DeliveryUpdate {
    /// Status the record ends up in.
    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryUpdate::Sent { .. } => DeliveryStatus::Sent,
            DeliveryUpdate::Failed { .. } => DeliveryStatus::Failed,
        }
    }

    /// Channel name stored in `sent_via`.
    pub fn sent_via(&self) -> Option<&str> {
        match self {
            DeliveryUpdate::Sent { channel, .. } => Some(channel),
            DeliveryUpdate::Failed { .. } => None,
        }
    }

    /// Terminal transition timestamp.
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            DeliveryUpdate::Sent { at, .. } | DeliveryUpdate::Failed { at } => *at,
        }
    }
}

/// Durable state of one notification send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Unique record id.
    pub id: DeliveryId,
    /// Recipient the notification was addressed to.
    pub recipient_id: RecipientId,
    /// Short subject line.
    pub subject: String,
    /// Message body.
    pub message: String,
    /// Current lifecycle state.
    pub status: DeliveryStatus,
    /// Channel that delivered the message. Set iff `status` is `sent`.
    pub sent_via: Option<String>,
    /// Creation timestamp in UTC.
    pub created_at: DateTime<Utc>,
    /// Terminal transition timestamp in UTC.
    pub sent_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// Creates a new `pending` record.
    pub fn pending(
        recipient_id: RecipientId,
        subject: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            recipient_id,
            subject: subject.into(),
            message: message.into(),
            status: DeliveryStatus::Pending,
            sent_via: None,
            created_at,
            sent_at: None,
        }
    }

    /// Transitions `pending -> sent` and returns the update to persist.
    pub fn mark_sent(
        &mut self,
        channel: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<DeliveryUpdate, ProtoError> {
        self.apply(DeliveryUpdate::Sent {
            channel: channel.into(),
            at,
        })
    }

    /// Transitions `pending -> failed` and returns the update to persist.
    pub fn mark_failed(&mut self, at: DateTime<Utc>) -> Result<DeliveryUpdate, ProtoError> {
        self.apply(DeliveryUpdate::Failed { at })
    }

    /// Applies a terminal update. Only valid on a `pending` record.
    pub fn apply(&mut self, update: DeliveryUpdate) -> Result<DeliveryUpdate, ProtoError> {
        if self.status.is_terminal() {
            return Err(ProtoError::InvalidTransition {
                from: self.status,
                to: update.status(),
            });
        }
        self.status = update.status();
        self.sent_via = update.sent_via().map(str::to_string);
        self.sent_at = Some(update.at());
        Ok(update)
    }
}
