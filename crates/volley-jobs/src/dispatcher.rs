//! Bounded concurrent batch dispatcher.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use volley_core::{defaults, Endpoint, Error, Outcome, RequestError, Result, Task};

use crate::events::{BatchEvent, EventPublisher};
use crate::executor::Session;

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of tasks executing at once (K).
    pub concurrency_limit: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: defaults::CONCURRENCY_LIMIT,
            event_capacity: defaults::EVENT_BUS_CAPACITY,
        }
    }
}

impl DispatcherConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `VOLLEY_CONCURRENCY` | `3` | Max tasks in flight |
    pub fn from_env() -> Self {
        let concurrency_limit = std::env::var("VOLLEY_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::CONCURRENCY_LIMIT)
            .max(1);

        Self {
            concurrency_limit,
            ..Self::default()
        }
    }

    /// Set the concurrency limit. Values below 1 are raised to 1.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }
}

/// Every outcome of a finished batch, in input order.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub batch_id: Uuid,
    pub outcomes: Vec<Outcome<T>>,
    pub elapsed: Duration,
}

impl<T> BatchReport<T> {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.successful()
    }

    /// Attempts consumed across all tasks.
    pub fn total_attempts(&self) -> u32 {
        self.outcomes.iter().map(|o| o.attempts).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome<T>> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// `Err(BatchFailed)` unless every task succeeded. The report stays
    /// with the caller.
    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::BatchFailed {
                failed: self.failed(),
                total: self.total(),
            })
        }
    }

    /// All responses in input order, or `BatchFailed` if any task failed.
    pub fn into_result(self) -> Result<Vec<T>> {
        self.ensure_success()?;
        Ok(self
            .outcomes
            .into_iter()
            .filter_map(|o| o.result.ok())
            .collect())
    }
}

/// Runs batches of tasks with at most `concurrency_limit` in flight.
///
/// The semaphore belongs to the dispatcher, so batches started concurrently
/// on the same dispatcher share the bound.
pub struct Dispatcher {
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    event_tx: broadcast::Sender<BatchEvent>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let limit = config.concurrency_limit.max(1);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config: DispatcherConfig {
                concurrency_limit: limit,
                ..config
            },
            semaphore: Arc::new(Semaphore::new(limit)),
            event_tx,
        }
    }

    /// Dispatcher with default settings and the given limit.
    pub fn with_concurrency(limit: usize) -> Self {
        Self::new(DispatcherConfig::default().with_concurrency(limit))
    }

    pub fn concurrency_limit(&self) -> usize {
        self.config.concurrency_limit
    }

    /// Permits not currently held. Equals the limit whenever no batch runs.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Subscribe to events of batches started after this call.
    pub fn events(&self) -> broadcast::Receiver<BatchEvent> {
        self.event_tx.subscribe()
    }

    /// Run every task to its outcome. Never fails; inspect the report.
    pub async fn run_batch<E>(
        &self,
        session: &Session<E>,
        tasks: Vec<Task<E::Request>>,
    ) -> BatchReport<E::Response>
    where
        E: Endpoint + 'static,
    {
        let mut batch = self.spawn_batch(session, tasks);
        batch.drain().await;
        batch.finish()
    }

    /// Like [`run_batch`](Self::run_batch), but stops early when `shutdown`
    /// resolves: in-flight tasks are aborted, their permits released, and
    /// `Error::Cancelled` is returned.
    pub async fn run_batch_until<E, F>(
        &self,
        session: &Session<E>,
        tasks: Vec<Task<E::Request>>,
        shutdown: F,
    ) -> Result<BatchReport<E::Response>>
    where
        E: Endpoint + 'static,
        F: Future<Output = ()>,
    {
        let mut batch = self.spawn_batch(session, tasks);

        let cancelled = tokio::select! {
            _ = batch.drain() => false,
            _ = shutdown => true,
        };

        if cancelled {
            batch.abort().await;
            return Err(Error::Cancelled);
        }
        Ok(batch.finish())
    }

    /// Spawn one task per input, each gated by the semaphore.
    fn spawn_batch<E>(
        &self,
        session: &Session<E>,
        tasks: Vec<Task<E::Request>>,
    ) -> RunningBatch<E::Response>
    where
        E: Endpoint + 'static,
    {
        let batch_id = Uuid::now_v7();
        let publisher = EventPublisher::new(batch_id, self.event_tx.clone());
        let indices: Vec<usize> = tasks.iter().map(|t| t.index).collect();

        info!(
            subsystem = "dispatcher",
            %batch_id,
            tasks = indices.len(),
            concurrency = self.config.concurrency_limit,
            "Batch started"
        );

        let mut set = JoinSet::new();
        for (slot, task) in tasks.into_iter().enumerate() {
            publisher.publish(BatchEvent::TaskQueued {
                batch_id,
                index: task.index,
            });
            set.spawn(run_task(
                slot,
                task,
                session.clone(),
                self.semaphore.clone(),
                publisher.clone(),
            ));
        }

        RunningBatch {
            batch_id,
            publisher,
            started: Instant::now(),
            slots: indices.iter().map(|_| None).collect(),
            indices,
            set,
        }
    }
}

/// Convenience for a one-off batch with concurrency `k`.
pub async fn run_batch<E>(
    session: &Session<E>,
    tasks: Vec<Task<E::Request>>,
    k: usize,
) -> BatchReport<E::Response>
where
    E: Endpoint + 'static,
{
    Dispatcher::with_concurrency(k).run_batch(session, tasks).await
}

/// Body of one spawned task. Returns the input slot with the outcome.
async fn run_task<E>(
    slot: usize,
    task: Task<E::Request>,
    session: Session<E>,
    semaphore: Arc<Semaphore>,
    events: EventPublisher,
) -> (usize, Outcome<E::Response>)
where
    E: Endpoint + 'static,
{
    let index = task.index;
    let attempts = AtomicU32::new(0);

    let run = async {
        // Held until this future completes or is dropped
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Outcome::failure(index, 0, RequestError::internal("dispatcher closed"))
            }
        };
        events.publish(BatchEvent::TaskStarted {
            batch_id: events.batch_id,
            index,
        });
        session.execute_tracked(&task, Some(&events), &attempts).await
    };

    let outcome = match AssertUnwindSafe(run).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(task = index, panic = %message, "Task panicked");
            Outcome::failure(
                index,
                attempts.load(Ordering::SeqCst),
                RequestError::internal(format!("task panicked: {}", message)),
            )
        }
    };

    match &outcome.result {
        Ok(_) => events.publish(BatchEvent::TaskSucceeded {
            batch_id: events.batch_id,
            index,
            attempts: outcome.attempts,
        }),
        Err(e) => events.publish(BatchEvent::TaskFailed {
            batch_id: events.batch_id,
            index,
            attempts: outcome.attempts,
            kind: e.kind,
            error: e.message.clone(),
        }),
    }

    (slot, outcome)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Spawned tasks of one batch and the outcomes collected so far.
struct RunningBatch<T> {
    batch_id: Uuid,
    publisher: EventPublisher,
    started: Instant,
    indices: Vec<usize>,
    slots: Vec<Option<Outcome<T>>>,
    set: JoinSet<(usize, Outcome<T>)>,
}

impl<T: Send + 'static> RunningBatch<T> {
    /// Wait for every spawned task. Cancel-safe: outcomes land in their slot
    /// as they arrive.
    async fn drain(&mut self) {
        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((slot, outcome)) => self.slots[slot] = Some(outcome),
                Err(e) => error!(error = ?e, "Task join failed"),
            }
        }
    }

    /// Abort whatever is still running and wait for it to unwind.
    async fn abort(&mut self) {
        let remaining = self.set.len();
        self.set.abort_all();
        while self.set.join_next().await.is_some() {}
        warn!(
            subsystem = "dispatcher",
            batch_id = %self.batch_id,
            aborted = remaining,
            "Batch cancelled"
        );
    }

    fn finish(self) -> BatchReport<T> {
        let outcomes: Vec<Outcome<T>> = self
            .slots
            .into_iter()
            .zip(self.indices)
            .map(|(slot, index)| {
                slot.unwrap_or_else(|| {
                    Outcome::failure(index, 0, RequestError::internal("task did not complete"))
                })
            })
            .collect();

        let report = BatchReport {
            batch_id: self.batch_id,
            outcomes,
            elapsed: self.started.elapsed(),
        };

        info!(
            subsystem = "dispatcher",
            batch_id = %report.batch_id,
            successful = report.successful(),
            failed = report.failed(),
            total = report.total(),
            attempts = report.total_attempts(),
            duration_ms = report.elapsed.as_millis() as u64,
            "Batch finished"
        );

        self.publisher.publish(BatchEvent::BatchFinished {
            batch_id: report.batch_id,
            successful: report.successful(),
            total: report.total(),
            duration_ms: report.elapsed.as_millis() as u64,
        });

        report
    }
}
