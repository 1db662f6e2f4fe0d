use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Result of one channel attempt.
///
/// Channels hand this back instead of raising; a failure carries the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The channel accepted the message for delivery.
    Success { detail: String },
    /// The channel could not deliver.
    Failure { reason: ChannelError },
}

impl Outcome {
    /// Builds a success outcome with a provider-facing detail (address, message id).
    pub fn success(detail: impl Into<String>) -> Self {
        Outcome::Success {
            detail: detail.into(),
        }
    }

    /// Builds a failure outcome.
    pub fn failure(reason: ChannelError) -> Self {
        Outcome::Failure { reason }
    }

    /// Returns `true` for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl From<Result<String, ChannelError>> for Outcome {
    fn from(result: Result<String, ChannelError>) -> Self {
        match result {
            Ok(detail) => Outcome::Success { detail },
            Err(reason) => Outcome::Failure { reason },
        }
    }
}

/// One failed channel attempt inside a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    /// Channel name.
    pub channel: String,
    /// Human-readable failure reason.
    pub reason: String,
}

/// Summary of one fallback engine run. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Whether any channel succeeded.
    pub success: bool,
    /// Channel that delivered the message.
    pub successful_channel: Option<String>,
    /// Channels that were attempted and failed, in attempt order.
    pub failed_channels: Vec<String>,
    /// Failure reasons, parallel to `failed_channels`.
    pub failures: Vec<FailedAttempt>,
    /// `failed_channels.len()` plus one when a channel succeeded.
    pub total_attempted: usize,
}

impl DeliveryReport {
    /// Appends a failed attempt.
    pub fn record_failure(&mut self, channel: &str, reason: &ChannelError) {
        self.failed_channels.push(channel.to_string());
        self.failures.push(FailedAttempt {
            channel: channel.to_string(),
            reason: reason.to_string(),
        });
        self.total_attempted += 1;
    }

    /// Marks the run as delivered by `channel`.
    pub fn record_success(&mut self, channel: &str) {
        self.success = true;
        self.successful_channel = Some(channel.to_string());
        self.total_attempted += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_result_maps_both_arms() {
        assert_eq!(
            Outcome::from(Ok("SM123".to_string())),
            Outcome::success("SM123")
        );

        let outcome = Outcome::from(Err(ChannelError::Rejected("blocked".into())));
        assert_eq!(
            outcome,
            Outcome::failure(ChannelError::Rejected("blocked".into()))
        );
    }

    #[test]
    fn empty_report_is_unsuccessful() {
        let report = DeliveryReport::default();
        assert!(!report.success);
        assert_eq!(report.successful_channel, None);
        assert!(report.failed_channels.is_empty());
        assert_eq!(report.total_attempted, 0);
    }

    #[test]
    fn total_attempted_counts_failures_and_success() {
        let mut report = DeliveryReport::default();
        report.record_failure("chat", &ChannelError::NotApplicable("no chat id".into()));
        report.record_success("email");

        assert!(report.success);
        assert_eq!(report.successful_channel.as_deref(), Some("email"));
        assert_eq!(report.failed_channels, vec!["chat".to_string()]);
        assert_eq!(report.failures[0].reason, "Not applicable: no chat id");
        assert_eq!(report.total_attempted, 2);
    }

    #[test]
    fn report_serializes_with_snake_case_fields() {
        let mut report = DeliveryReport::default();
        report.record_failure("sms", &ChannelError::Transport("timeout".into()));

        let value = serde_json::to_value(&report).expect("serialize report");
        assert_eq!(value["success"], false);
        assert_eq!(value["successful_channel"], serde_json::Value::Null);
        assert_eq!(value["failed_channels"][0], "sms");
        assert_eq!(value["total_attempted"], 1);
    }
}
