//! DLQ store port: dead-lettered job documents.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::dlq::{DlqJob, DlqStatus};
use crate::domain::foundation::{AppError, Timestamp};

/// Durable store for jobs that exhausted their in-queue retries.
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Persist a captured entry.
    async fn insert(&self, entry: &DlqJob) -> Result<(), AppError>;

    /// Entries due for a retry pass: status in {pending, failed},
    /// `retry_count < max_retries`, and `next_retry_at` unset or past,
    /// ordered by `created_at` ascending, at most `batch_size`.
    async fn due_for_retry(
        &self,
        max_retries: u32,
        batch_size: u32,
        now: Timestamp,
    ) -> Result<Vec<DlqJob>, AppError>;

    /// Mark an entry as picked up by the retry consumer.
    async fn mark_processing(&self, id: &Uuid) -> Result<(), AppError>;

    /// Mark an entry completed.
    async fn mark_completed(&self, id: &Uuid) -> Result<(), AppError>;

    /// Record a failed retry and schedule the next attempt.
    async fn mark_failed(
        &self,
        id: &Uuid,
        retry_count: u32,
        error_msg: &str,
        next_retry_at: Option<Timestamp>,
    ) -> Result<(), AppError>;

    /// Record a payload that cannot be parsed; never retried.
    async fn mark_invalid_payload(&self, id: &Uuid, error_msg: &str) -> Result<(), AppError>;

    /// Mark an entry permanently failed after the DLQ retry cap.
    async fn mark_permanently_failed(&self, id: &Uuid, error_msg: &str) -> Result<(), AppError>;

    /// Delete entries whose retention window has passed. Returns the count.
    async fn sweep_expired(&self, now: Timestamp) -> Result<u64, AppError>;

    /// Status → count aggregation, for introspection.
    async fn stats(&self) -> Result<HashMap<DlqStatus, u64>, AppError>;
}
