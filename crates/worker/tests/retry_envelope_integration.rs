use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use channels::NotificationChannel;
use engine::{DeliveryStore, FallbackEngine, MemoryStore, RecipientDirectory};
use parking_lot::Mutex;
use proto::{
    ChannelError, DatabaseError, DeliveryId, DeliveryRecord, DeliveryStatus, DeliveryUpdate,
    DispatchError, Outcome, Recipient, RecipientId,
};
use worker::{
    DeliveryTask, ExhaustedReason, RetryEnvelope, RetryPolicy, TaskDispatcher, TaskOutcome,
};

/// Fails the first `failures` sends, then succeeds.
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl NotificationChannel for Flaky {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, _: &Recipient, _: &str, _: &str) -> Outcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Outcome::failure(ChannelError::Transport("SMTP error: connection refused".into()))
        } else {
            Outcome::success("to alice@example.com")
        }
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    dispatched: Mutex<Vec<(DeliveryTask, Duration)>>,
    closed: bool,
}

impl RecordingDispatcher {
    fn take_last(&self) -> (DeliveryTask, Duration) {
        self.dispatched.lock().last().cloned().expect("a retry was dispatched")
    }

    fn delays(&self) -> Vec<Duration> {
        self.dispatched.lock().iter().map(|(_, d)| *d).collect()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(&self, task: DeliveryTask, delay: Duration) -> Result<(), DispatchError> {
        if self.closed {
            return Err(DispatchError::Closed);
        }
        self.dispatched.lock().push((task, delay));
        Ok(())
    }
}

struct BrokenDirectory;

#[async_trait]
impl RecipientDirectory for BrokenDirectory {
    async fn find(&self, _: &RecipientId) -> Result<Option<Recipient>, DatabaseError> {
        Err(DatabaseError::Sqlx("database is locked".into()))
    }
}

/// Delivery store whose writes fail, or panic when `panics` is set.
struct BrokenStore {
    panics: bool,
}

#[async_trait]
impl DeliveryStore for BrokenStore {
    async fn create(&self, _: &DeliveryRecord) -> Result<DeliveryId, DatabaseError> {
        if self.panics {
            panic!("connection pool poisoned");
        }
        Err(DatabaseError::Sqlx("disk I/O error".into()))
    }

    async fn update(&self, _: &DeliveryId, _: &DeliveryUpdate) -> Result<(), DatabaseError> {
        Err(DatabaseError::Sqlx("disk I/O error".into()))
    }

    async fn get(&self, _: &DeliveryId) -> Result<Option<DeliveryRecord>, DatabaseError> {
        Ok(None)
    }

    async fn list_recent(&self, _: usize) -> Result<Vec<DeliveryRecord>, DatabaseError> {
        Ok(Vec::new())
    }
}

fn broken_store_envelope(panics: bool) -> (RetryEnvelope, Arc<RecordingDispatcher>, Arc<Flaky>) {
    let directory = Arc::new(MemoryStore::new());
    directory.insert_recipient(Recipient::new("42", "alice").with_email("a@x.io"));
    let channel = Arc::new(Flaky {
        failures: 0,
        calls: AtomicUsize::new(0),
    });
    let engine = Arc::new(FallbackEngine::with_system_clock(
        vec![channel.clone() as Arc<dyn NotificationChannel>],
        Arc::new(BrokenStore { panics }),
    ));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let envelope = RetryEnvelope::new(engine, directory, dispatcher.clone(), policy());
    (envelope, dispatcher, channel)
}

struct Harness {
    envelope: RetryEnvelope,
    store: Arc<MemoryStore>,
    dispatcher: Arc<RecordingDispatcher>,
    channel: Arc<Flaky>,
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        failure_delay: Duration::from_secs(60),
        fault_delay: Duration::from_secs(30),
        backoff_factor: 2,
        max_delay: Duration::from_secs(600),
        ..Default::default()
    }
}

fn harness(failures: usize, dispatcher: RecordingDispatcher) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.insert_recipient(Recipient::new("42", "alice").with_email("a@x.io"));
    let channel = Arc::new(Flaky {
        failures,
        calls: AtomicUsize::new(0),
    });
    let engine = Arc::new(FallbackEngine::with_system_clock(
        vec![channel.clone() as Arc<dyn NotificationChannel>],
        store.clone(),
    ));
    let dispatcher = Arc::new(dispatcher);
    let envelope = RetryEnvelope::new(engine, store.clone(), dispatcher.clone(), policy());
    Harness {
        envelope,
        store,
        dispatcher,
        channel,
    }
}

#[tokio::test]
async fn two_total_failures_then_success_completes_on_third_attempt() {
    let h = harness(2, RecordingDispatcher::default());

    let first = h.envelope.run(DeliveryTask::new("42", "Hi", "Body")).await;
    assert!(matches!(first, TaskOutcome::Retrying { attempt: 2, .. }));
    let (task, _) = h.dispatcher.take_last();

    let second = h.envelope.run(task).await;
    assert!(matches!(second, TaskOutcome::Retrying { attempt: 3, .. }));
    let (task, _) = h.dispatcher.take_last();

    match h.envelope.run(task).await {
        TaskOutcome::Completed {
            channel, attempt, ..
        } => {
            assert_eq!(channel, "email");
            assert_eq!(attempt, 3);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let delays = h.dispatcher.delays();
    assert_eq!(delays.len(), 2);
    assert!(delays.iter().all(|d| !d.is_zero()));
    assert!(delays[1] >= delays[0]);

    let statuses: Vec<_> = h.store.records().iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![DeliveryStatus::Failed, DeliveryStatus::Failed, DeliveryStatus::Sent]
    );
}

#[tokio::test]
async fn total_failure_stops_after_max_retries() {
    let h = harness(usize::MAX, RecordingDispatcher::default());
    let mut task = DeliveryTask::new("42", "Hi", "Body");
    let mut outcomes = Vec::new();

    loop {
        let outcome = h.envelope.run(task.clone()).await;
        let terminal = outcome.is_terminal();
        outcomes.push(outcome);
        if terminal {
            break;
        }
        task = h.dispatcher.take_last().0;
    }

    assert_eq!(outcomes.len(), 4);
    match outcomes.last() {
        Some(TaskOutcome::Exhausted { reason, detail, .. }) => {
            assert_eq!(*reason, ExhaustedReason::MaxRetriesExceeded);
            assert!(detail.contains("all channels failed: email"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.dispatcher.delays().len(), 3);
    assert_eq!(
        h.dispatcher.delays(),
        vec![
            Duration::from_secs(60),
            Duration::from_secs(120),
            Duration::from_secs(240)
        ]
    );
    assert_eq!(h.channel.calls.load(Ordering::SeqCst), 4);
    assert_eq!(h.store.records().len(), 4);
}

#[tokio::test]
async fn missing_recipient_is_terminal_without_retry() {
    let h = harness(0, RecordingDispatcher::default());

    let outcome = h.envelope.run(DeliveryTask::new("404", "Hi", "Body")).await;

    assert_eq!(
        outcome,
        TaskOutcome::NotFound {
            recipient_id: RecipientId::from("404")
        }
    );
    assert!(h.dispatcher.delays().is_empty());
    assert!(h.store.records().is_empty());
    assert_eq!(h.channel.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lookup_fault_uses_fault_delay_and_its_own_budget() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(FallbackEngine::with_system_clock(Vec::new(), store.clone()));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let envelope = RetryEnvelope::new(
        engine,
        Arc::new(BrokenDirectory),
        dispatcher.clone(),
        policy(),
    );

    let mut task = DeliveryTask::new("42", "Hi", "Body");
    let mut runs = 0;
    let last = loop {
        runs += 1;
        let outcome = envelope.run(task.clone()).await;
        if outcome.is_terminal() {
            break outcome;
        }
        task = dispatcher.take_last().0;
    };

    assert_eq!(runs, 4);
    assert_eq!(task.fault_retries, 3);
    assert_eq!(task.retries, 0);
    assert!(matches!(
        last,
        TaskOutcome::Exhausted {
            reason: ExhaustedReason::MaxRetriesExceeded,
            ..
        }
    ));
    assert_eq!(dispatcher.delays()[0], Duration::from_secs(30));
    assert!(store.records().is_empty());
}

#[tokio::test]
async fn store_error_retries_on_fault_budget_until_exhausted() {
    let (envelope, dispatcher, channel) = broken_store_envelope(false);

    let first = envelope.run(DeliveryTask::new("42", "Hi", "Body")).await;
    assert_eq!(
        first,
        TaskOutcome::Retrying {
            recipient_id: RecipientId::from("42"),
            attempt: 2,
            delay: Duration::from_secs(30),
        }
    );
    let mut task = dispatcher.take_last().0;
    assert_eq!(task.fault_retries, 1);
    assert_eq!(task.retries, 0);

    let last = loop {
        let outcome = envelope.run(task.clone()).await;
        if outcome.is_terminal() {
            break outcome;
        }
        task = dispatcher.take_last().0;
    };

    match last {
        TaskOutcome::Exhausted { reason, detail, .. } => {
            assert_eq!(reason, ExhaustedReason::MaxRetriesExceeded);
            assert!(detail.contains("engine error: Store error"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(task.fault_retries, 3);
    assert_eq!(task.retries, 0);
    assert_eq!(
        dispatcher.delays(),
        vec![
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(120)
        ]
    );
    assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn engine_panic_is_retried_as_a_fault() {
    let (envelope, dispatcher, _) = broken_store_envelope(true);

    let outcome = envelope.run(DeliveryTask::new("42", "Hi", "Body")).await;

    assert!(matches!(
        outcome,
        TaskOutcome::Retrying { attempt: 2, delay, .. } if delay == Duration::from_secs(30)
    ));
    let (task, _) = dispatcher.take_last();
    assert_eq!(task.fault_retries, 1);
    assert_eq!(task.retries, 0);
}

#[tokio::test]
async fn dispatch_failure_is_reported_as_exhausted() {
    let h = harness(
        usize::MAX,
        RecordingDispatcher {
            closed: true,
            ..Default::default()
        },
    );

    let outcome = h.envelope.run(DeliveryTask::new("42", "Hi", "Body")).await;

    match outcome {
        TaskOutcome::Exhausted { reason, detail, .. } => {
            assert_eq!(reason, ExhaustedReason::DispatchFailed);
            assert!(detail.contains("Task queue closed"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn zero_retry_budget_exhausts_on_first_failure() {
    let store = Arc::new(MemoryStore::new());
    store.insert_recipient(Recipient::new("42", "alice"));
    let engine = Arc::new(FallbackEngine::with_system_clock(Vec::new(), store.clone()));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let envelope = RetryEnvelope::new(
        engine,
        store,
        dispatcher.clone(),
        RetryPolicy {
            max_retries: 0,
            ..policy()
        },
    );

    let outcome = envelope.run(DeliveryTask::new("42", "Hi", "Body")).await;
    assert!(matches!(outcome, TaskOutcome::Exhausted { .. }));
    assert!(dispatcher.delays().is_empty());
}
