//! The [`JobQueue`] trait: at-least-once hand-off of job ids to workers.

use std::time::Duration;

use async_trait::async_trait;
use matte_core::types::JobId;

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// One delivery of a job id to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub job_id: JobId,
    /// 1 on first delivery, higher on every later delivery of the same id.
    /// [`JobQueue::ack`] only removes the id when this is still the latest.
    pub attempt: u32,
}

/// FIFO work queue with visibility-timeout redelivery.
///
/// A dequeued id stays invisible to other consumers until it is acked or
/// its visibility timeout expires, after which it is delivered again.
/// Consumers must therefore tolerate duplicates.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Make `job_id` available to workers. Idempotent: an id that is already
    /// queued or in flight becomes visible again rather than duplicated.
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next visible id.
    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Remove a delivered id from the queue. A no-op when the id has been
    /// delivered or enqueued again since `delivery`.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Number of ids queued or in flight.
    async fn depth(&self) -> Result<u64, QueueError>;

    /// Cheap health probe.
    async fn ping(&self) -> Result<(), QueueError>;
}
