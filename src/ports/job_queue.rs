//! Job queue port: score-ordered set plus a dead-letter list.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::job::Job;

/// Queue transport failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("job serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Score-ordered work queue.
///
/// The only concurrency primitive producers and consumers rely on is
/// [`JobQueue::pop_lowest`]: an indivisible read-and-remove of the
/// lowest-scored member.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a job at its enqueue score.
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

    /// Re-insert a failed job at the given retry score.
    async fn schedule_retry(&self, job: &Job, retry_at: i64) -> Result<(), QueueError>;

    /// Re-insert a popped-but-unprocessed job at its original score
    /// (shutdown path).
    async fn requeue(&self, job: &Job) -> Result<(), QueueError>;

    /// Atomically pop the lowest-scored member, if any.
    ///
    /// Returns the raw serialized job so a corrupt entry can still be routed
    /// to the dead-letter list.
    async fn pop_lowest(&self) -> Result<Option<Vec<u8>>, QueueError>;

    /// Append raw bytes to the dead-letter list.
    async fn push_dead_letter(&self, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Blocking pop from the dead-letter list with a timeout.
    ///
    /// Returns `Ok(None)` when the timeout elapses with nothing available.
    async fn pop_dead_letter(&self, timeout_secs: u64) -> Result<Option<Vec<u8>>, QueueError>;

    /// Number of jobs currently queued.
    async fn len(&self) -> Result<u64, QueueError>;
}
