//! Background delivery: bounded retry around the fallback engine, plus the
//! in-process task queue that schedules those retries.

pub mod envelope;
pub mod queue;

/// Retry policy, task descriptor and the envelope that runs one task.
pub use envelope::{
    DeliveryTask, ExhaustedReason, RetryEnvelope, RetryKind, RetryPolicy, TaskDispatcher,
    TaskOutcome,
};
/// Delayed-dispatch queue and the worker loop that drains it.
pub use queue::{TaskQueue, Worker};
