//! Bounded retry around one engine invocation.
//!
//! The envelope never loops in place. A retry is a new [`DeliveryTask`] handed
//! to the [`TaskDispatcher`] with a delay; the dispatcher decides when it runs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use engine::{FallbackEngine, RecipientDirectory};
use futures_util::FutureExt;
use proto::{DeliveryId, DispatchError, RecipientId};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{error, info, warn};

/// Deferred invocation descriptor: who, what, and how many retries are used up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTask {
    pub recipient_id: RecipientId,
    pub subject: String,
    pub message: String,
    /// Retries already spent on total failure.
    #[serde(default)]
    pub retries: u32,
    /// Retries already spent on unexpected faults.
    #[serde(default)]
    pub fault_retries: u32,
}

impl DeliveryTask {
    pub fn new(
        recipient_id: impl Into<RecipientId>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            subject: subject.into(),
            message: message.into(),
            retries: 0,
            fault_retries: 0,
        }
    }

    /// 1-based number of this invocation.
    pub fn attempt(&self) -> u32 {
        1 + self.retries + self.fault_retries
    }
}

/// Accepts retry requests. The envelope issues retries only through this.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Schedules `task` to run after `delay`.
    async fn dispatch(&self, task: DeliveryTask, delay: Duration) -> Result<(), DispatchError>;
}

/// Why a task is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// The engine ran and every channel failed.
    TotalFailure,
    /// The engine or recipient lookup failed unexpectedly.
    Fault,
}

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub failure_delay: Duration,
    pub max_fault_retries: u32,
    pub fault_delay: Duration,
    /// Multiplier applied per retry. `1` keeps the delay fixed.
    pub backoff_factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            failure_delay: Duration::from_secs(60),
            max_fault_retries: 3,
            fault_delay: Duration::from_secs(30),
            backoff_factor: 2,
            max_delay: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Shortest delay ever scheduled.
    pub const MIN_DELAY: Duration = Duration::from_millis(1);

    /// Delay before retry number `retry_index` (0-based) of the given kind.
    ///
    /// `base * factor^index`, capped at `max_delay`, never below [`Self::MIN_DELAY`].
    pub fn delay_for(&self, kind: RetryKind, retry_index: u32) -> Duration {
        let base = match kind {
            RetryKind::TotalFailure => self.failure_delay,
            RetryKind::Fault => self.fault_delay,
        };
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let multiplier = u64::from(self.backoff_factor.max(1)).saturating_pow(retry_index);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(base_ms.saturating_mul(multiplier).min(max_ms));
        delay.max(Self::MIN_DELAY)
    }

    fn limit(&self, kind: RetryKind) -> u32 {
        match kind {
            RetryKind::TotalFailure => self.max_retries,
            RetryKind::Fault => self.max_fault_retries,
        }
    }
}

/// Why a task gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedReason {
    MaxRetriesExceeded,
    DispatchFailed,
}

/// Result of running one task through the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A channel delivered the notification.
    Completed {
        recipient_id: RecipientId,
        channel: String,
        delivery_id: DeliveryId,
        attempt: u32,
    },
    /// Failed this time; a retry was dispatched.
    Retrying {
        recipient_id: RecipientId,
        attempt: u32,
        delay: Duration,
    },
    /// Gave up. Reported, never dropped.
    Exhausted {
        recipient_id: RecipientId,
        reason: ExhaustedReason,
        detail: String,
    },
    /// The recipient does not exist. Never retried.
    NotFound { recipient_id: RecipientId },
}

impl TaskOutcome {
    /// `false` only for [`TaskOutcome::Retrying`].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskOutcome::Retrying { .. })
    }
}

/// Wire shape of [`TaskOutcome`]: `{"status": "success" | "retrying" | "error", ...}`.
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum OutcomeRepr<'a> {
    Success {
        recipient_id: &'a RecipientId,
        channel: &'a str,
        delivery_id: &'a DeliveryId,
        attempt: u32,
    },
    Retrying {
        recipient_id: &'a RecipientId,
        attempt: u32,
        delay_ms: u64,
    },
    Error {
        recipient_id: &'a RecipientId,
        reason: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<&'a str>,
    },
}

impl Serialize for TaskOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self {
            TaskOutcome::Completed {
                recipient_id,
                channel,
                delivery_id,
                attempt,
            } => OutcomeRepr::Success {
                recipient_id,
                channel,
                delivery_id,
                attempt: *attempt,
            },
            TaskOutcome::Retrying {
                recipient_id,
                attempt,
                delay,
            } => OutcomeRepr::Retrying {
                recipient_id,
                attempt: *attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            },
            TaskOutcome::Exhausted {
                recipient_id,
                reason,
                detail,
            } => OutcomeRepr::Error {
                recipient_id,
                reason: match reason {
                    ExhaustedReason::MaxRetriesExceeded => "max_retries_exceeded",
                    ExhaustedReason::DispatchFailed => "dispatch_failed",
                },
                detail: Some(detail),
            },
            TaskOutcome::NotFound { recipient_id } => OutcomeRepr::Error {
                recipient_id,
                reason: "recipient_not_found",
                detail: None,
            },
        };
        repr.serialize(serializer)
    }
}

/// Runs one [`DeliveryTask`] against the engine and decides what happens next.
pub struct RetryEnvelope {
    engine: Arc<FallbackEngine>,
    directory: Arc<dyn RecipientDirectory>,
    dispatcher: Arc<dyn TaskDispatcher>,
    policy: RetryPolicy,
}

impl RetryEnvelope {
    pub fn new(
        engine: Arc<FallbackEngine>,
        directory: Arc<dyn RecipientDirectory>,
        dispatcher: Arc<dyn TaskDispatcher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            engine,
            directory,
            dispatcher,
            policy,
        }
    }

    /// Executes one attempt of `task`.
    pub async fn run(&self, task: DeliveryTask) -> TaskOutcome {
        let recipient = match self.directory.find(&task.recipient_id).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => {
                error!(recipient_id = %task.recipient_id, "Recipient not found; dropping task");
                return TaskOutcome::NotFound {
                    recipient_id: task.recipient_id,
                };
            }
            Err(e) => {
                let detail = format!("recipient lookup failed: {e}");
                return self.retry(task, RetryKind::Fault, detail).await;
            }
        };

        info!(
            recipient = %recipient.username,
            attempt = task.attempt(),
            "Starting notification task"
        );
        let run = self
            .engine
            .deliver(&recipient, &task.subject, &task.message);
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(delivery)) => match delivery.report.successful_channel {
                Some(channel) => {
                    info!(
                        recipient = %recipient.username,
                        channel = %channel,
                        attempt = task.attempt(),
                        "Notification task completed"
                    );
                    TaskOutcome::Completed {
                        recipient_id: task.recipient_id.clone(),
                        channel,
                        delivery_id: delivery.record.id,
                        attempt: task.attempt(),
                    }
                }
                None => {
                    let detail = format!(
                        "all channels failed: {}",
                        delivery.report.failed_channels.join(", ")
                    );
                    self.retry(task, RetryKind::TotalFailure, detail).await
                }
            },
            Ok(Err(e)) => {
                let detail = format!("engine error: {e}");
                self.retry(task, RetryKind::Fault, detail).await
            }
            Err(_) => {
                self.retry(task, RetryKind::Fault, "engine panicked".to_string())
                    .await
            }
        }
    }

    async fn retry(&self, task: DeliveryTask, kind: RetryKind, detail: String) -> TaskOutcome {
        let used = match kind {
            RetryKind::TotalFailure => task.retries,
            RetryKind::Fault => task.fault_retries,
        };
        if used >= self.policy.limit(kind) {
            error!(
                recipient_id = %task.recipient_id,
                attempt = task.attempt(),
                ?kind,
                "Max retries exceeded: {detail}"
            );
            return TaskOutcome::Exhausted {
                recipient_id: task.recipient_id,
                reason: ExhaustedReason::MaxRetriesExceeded,
                detail,
            };
        }

        let delay = self.policy.delay_for(kind, used);
        let mut next = task;
        match kind {
            RetryKind::TotalFailure => next.retries += 1,
            RetryKind::Fault => next.fault_retries += 1,
        }
        let recipient_id = next.recipient_id.clone();
        let attempt = next.attempt();

        warn!(
            recipient_id = %recipient_id,
            next_attempt = attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "{detail}; retrying"
        );
        match self.dispatcher.dispatch(next, delay).await {
            Ok(()) => TaskOutcome::Retrying {
                recipient_id,
                attempt,
                delay,
            },
            Err(e) => {
                error!(recipient_id = %recipient_id, "Failed to schedule retry: {e}");
                TaskOutcome::Exhausted {
                    recipient_id,
                    reason: ExhaustedReason::DispatchFailed,
                    detail: format!("{detail}; {e}"),
                }
            }
        }
    }
}
