//! Progress events published while a batch runs.

use tokio::sync::broadcast;
use uuid::Uuid;

use volley_core::{Attempt, FailureKind};

/// Event emitted by the dispatcher and its executors.
///
/// Delivered over a `tokio::sync::broadcast` channel; slow subscribers may
/// observe `Lagged` and miss events, which never affects the batch itself.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// A task was spawned and is waiting for a permit.
    TaskQueued { batch_id: Uuid, index: usize },
    /// A task acquired its permit and is making its first attempt.
    TaskStarted { batch_id: Uuid, index: usize },
    /// An attempt failed. `attempt.backoff` is set when another attempt
    /// follows.
    AttemptFailed {
        batch_id: Uuid,
        index: usize,
        attempt: Attempt,
    },
    /// A task produced a response.
    TaskSucceeded {
        batch_id: Uuid,
        index: usize,
        attempts: u32,
    },
    /// A task ended in a terminal failure.
    TaskFailed {
        batch_id: Uuid,
        index: usize,
        attempts: u32,
        kind: FailureKind,
        error: String,
    },
    /// Every task has an outcome.
    BatchFinished {
        batch_id: Uuid,
        successful: usize,
        total: usize,
        duration_ms: u64,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> Uuid {
        match self {
            Self::TaskQueued { batch_id, .. }
            | Self::TaskStarted { batch_id, .. }
            | Self::AttemptFailed { batch_id, .. }
            | Self::TaskSucceeded { batch_id, .. }
            | Self::TaskFailed { batch_id, .. }
            | Self::BatchFinished { batch_id, .. } => *batch_id,
        }
    }

    /// Task index, for task-level events.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::TaskQueued { index, .. }
            | Self::TaskStarted { index, .. }
            | Self::AttemptFailed { index, .. }
            | Self::TaskSucceeded { index, .. }
            | Self::TaskFailed { index, .. } => Some(*index),
            Self::BatchFinished { .. } => None,
        }
    }
}

/// Publishing side of a batch's event stream.
#[derive(Debug, Clone)]
pub(crate) struct EventPublisher {
    pub(crate) batch_id: Uuid,
    tx: broadcast::Sender<BatchEvent>,
}

impl EventPublisher {
    pub(crate) fn new(batch_id: Uuid, tx: broadcast::Sender<BatchEvent>) -> Self {
        Self { batch_id, tx }
    }

    /// Send an event. Having no subscribers is not an error.
    pub(crate) fn publish(&self, event: BatchEvent) {
        let _ = self.tx.send(event);
    }
}
