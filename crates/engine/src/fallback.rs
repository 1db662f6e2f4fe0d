//! Ordered-fallback delivery loop.
//!
//! The engine walks its channel list in order, one channel at a time, and
//! stops at the first [`Outcome::Success`]. Every run creates exactly one
//! [`DeliveryRecord`] and moves it out of `pending` exactly once.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use channels::NotificationChannel;
use futures_util::FutureExt;
use proto::{ChannelError, DeliveryRecord, DeliveryReport, EngineError, Outcome, Recipient};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::store::DeliveryStore;

/// The persisted record and the ephemeral report of one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub record: DeliveryRecord,
    pub report: DeliveryReport,
}

/// Drives one notification through an ordered channel list.
pub struct FallbackEngine {
    channels: Vec<Arc<dyn NotificationChannel>>,
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
}

impl FallbackEngine {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        store: Arc<dyn DeliveryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            channels,
            store,
            clock,
        }
    }

    /// Engine on the wall clock.
    pub fn with_system_clock(
        channels: Vec<Arc<dyn NotificationChannel>>,
        store: Arc<dyn DeliveryStore>,
    ) -> Self {
        Self::new(channels, store, Arc::new(SystemClock))
    }

    /// Channel names in attempt order.
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Runs the fallback chain for one notification.
    ///
    /// Channel failures never surface as `Err`; they land in the report. Only
    /// persistence problems do.
    pub async fn deliver(
        &self,
        recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<Delivery, EngineError> {
        let mut record = DeliveryRecord::pending(
            recipient.id.clone(),
            subject,
            message,
            self.clock.now(),
        );
        let delivery_id = self.store.create(&record).await?;
        info!(
            delivery_id = %delivery_id,
            recipient = %recipient.username,
            channels = ?self.channel_names(),
            "Starting notification delivery"
        );

        let mut report = DeliveryReport::default();
        for channel in &self.channels {
            let name = channel.name();
            debug!(delivery_id = %delivery_id, channel = name, "Attempting channel");

            match attempt(channel.as_ref(), recipient, subject, message).await {
                Outcome::Success { detail } => {
                    let update = record.mark_sent(name, self.clock.now())?;
                    self.store.update(&delivery_id, &update).await?;
                    report.record_success(name);
                    info!(
                        delivery_id = %delivery_id,
                        channel = name,
                        attempted = report.total_attempted,
                        "Notification delivered {detail}"
                    );
                    return Ok(Delivery { record, report });
                }
                Outcome::Failure { reason } => {
                    report.record_failure(name, &reason);
                }
            }
        }

        let update = record.mark_failed(self.clock.now())?;
        self.store.update(&delivery_id, &update).await?;
        if self.channels.is_empty() {
            warn!(delivery_id = %delivery_id, "No channels configured; delivery failed");
        } else {
            error!(
                delivery_id = %delivery_id,
                recipient = %recipient.username,
                failed_channels = ?report.failed_channels,
                "All notification channels failed"
            );
        }
        Ok(Delivery { record, report })
    }

    /// [`FallbackEngine::deliver`] for callers that only need the report.
    pub async fn notify(
        &self,
        recipient: &Recipient,
        subject: &str,
        message: &str,
    ) -> Result<DeliveryReport, EngineError> {
        Ok(self.deliver(recipient, subject, message).await?.report)
    }
}

/// One channel attempt. A panic inside `send` becomes a [`ChannelError::Fault`].
async fn attempt(
    channel: &dyn NotificationChannel,
    recipient: &Recipient,
    subject: &str,
    message: &str,
) -> Outcome {
    match AssertUnwindSafe(channel.send(recipient, subject, message))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(payload) => {
            let text = panic_message(payload.as_ref());
            error!(channel = channel.name(), "Channel panicked during send: {text}");
            Outcome::failure(ChannelError::Fault(text))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use proto::DeliveryStatus;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    struct Fixed {
        name: &'static str,
        outcome: Outcome,
    }

    #[async_trait]
    impl NotificationChannel for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, _: &Recipient, _: &str, _: &str) -> Outcome {
            self.outcome.clone()
        }
    }

    /// Advances the shared clock on every send so timestamps are distinguishable.
    struct Ticking {
        clock: Arc<ManualClock>,
    }

    #[async_trait]
    impl NotificationChannel for Ticking {
        fn name(&self) -> &'static str {
            "chat"
        }

        async fn send(&self, _: &Recipient, _: &str, _: &str) -> Outcome {
            self.clock.advance(Duration::seconds(5));
            Outcome::success("to chat 7")
        }
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(owned.as_ref()), "bang");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn sent_at_comes_from_clock_after_the_attempt() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(MemoryStore::new());
        let engine = FallbackEngine::new(
            vec![Arc::new(Ticking {
                clock: Arc::clone(&clock),
            })],
            store.clone(),
            clock.clone(),
        );

        let delivery = engine
            .deliver(&Recipient::new("1", "alice"), "s", "m")
            .await
            .expect("deliver");

        assert_eq!(delivery.record.created_at, start);
        assert_eq!(delivery.record.sent_at, Some(start + Duration::seconds(5)));
        assert_eq!(store.records(), vec![delivery.record]);
    }

    #[tokio::test]
    async fn notify_returns_only_the_report() {
        let store = Arc::new(MemoryStore::new());
        let engine = FallbackEngine::with_system_clock(
            vec![Arc::new(Fixed {
                name: "sms",
                outcome: Outcome::success("to +15550001111"),
            })],
            store.clone(),
        );

        let report = engine
            .notify(&Recipient::new("1", "alice"), "s", "m")
            .await
            .expect("notify");
        assert!(report.success);
        assert_eq!(report.successful_channel.as_deref(), Some("sms"));
        assert_eq!(store.records()[0].status, DeliveryStatus::Sent);
    }

    #[test]
    fn channel_names_preserve_configured_order() {
        let chain: Vec<Arc<dyn NotificationChannel>> = ["sms", "chat", "email"]
            .into_iter()
            .map(|name| {
                Arc::new(Fixed {
                    name,
                    outcome: Outcome::success(name),
                }) as Arc<dyn NotificationChannel>
            })
            .collect();
        let engine = FallbackEngine::with_system_clock(chain, Arc::new(MemoryStore::new()));
        assert_eq!(engine.channel_names(), vec!["sms", "chat", "email"]);
    }
}
