use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proto::DispatchError;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::envelope::{DeliveryTask, RetryEnvelope, TaskDispatcher, TaskOutcome};

/// In-process task queue. Delayed dispatches are re-enqueued after a sleep.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<DeliveryTask>,
}

impl TaskQueue {
    /// Creates a queue and the receiver a [`Worker`] drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeliveryTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a task for immediate execution
    pub async fn enqueue(&self, task: DeliveryTask) -> Result<(), DispatchError> {
        self.tx.send(task).await.map_err(|_| DispatchError::Closed)
    }
}

#[async_trait]
impl TaskDispatcher for TaskQueue {
    /// Fails fast only when the queue is already closed. A queue that closes
    /// during the delay drops the task, and its last published outcome stays
    /// `Retrying`; that loss is logged at error level.
    async fn dispatch(&self, task: DeliveryTask, delay: Duration) -> Result<(), DispatchError> {
        if self.tx.is_closed() {
            return Err(DispatchError::Closed);
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let recipient_id = task.recipient_id.clone();
            let task_attempt = task.attempt();
            if tx.send(task).await.is_err() {
                error!(
                    recipient_id = %recipient_id,
                    attempt = task_attempt,
                    "Task queue closed before delayed retry; task dropped"
                );
            }
        });
        debug!("Retry scheduled in {}ms", delay.as_millis());
        Ok(())
    }
}

/// Drains a task queue, running each task as an independent unit of work.
pub struct Worker {
    envelope: Arc<RetryEnvelope>,
    concurrency: usize,
}

impl Worker {
    /// `concurrency` bounds how many tasks run at once (minimum 1).
    pub fn new(envelope: Arc<RetryEnvelope>, concurrency: usize) -> Self {
        Self {
            envelope,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs until every sender of `tasks` is gone, then waits for in-flight
    /// tasks. Every outcome, including retries, is published on `outcomes`.
    pub async fn run(
        self,
        mut tasks: mpsc::Receiver<DeliveryTask>,
        outcomes: mpsc::Sender<TaskOutcome>,
    ) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();
        info!(concurrency = self.concurrency, "Notification worker started");

        while let Some(task) = tasks.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let envelope = Arc::clone(&self.envelope);
            let outcomes = outcomes.clone();
            in_flight.spawn(async move {
                let outcome = envelope.run(task).await;
                drop(permit);
                if outcomes.send(outcome).await.is_err() {
                    debug!("Outcome receiver dropped");
                }
            });

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Notification task aborted: {e}");
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Notification task aborted: {e}");
            }
        }
        info!("Notification worker stopped");
    }
}
