//! DLQ retry consumer: re-drives dead-lettered work on an interval.
//!
//! Each pass sweeps expired entries, then picks up to `batch_size` entries
//! that are due (status pending/failed, retry budget left, `next_retry_at`
//! unset or past) and drives them through the worker handler directly. A
//! success completes the entry; a failure schedules the next attempt at
//! `retry_interval * backoff_factor^retries`, until the cap flips the entry
//! to permanently failed.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::dlq::DlqJob;
use crate::domain::foundation::Timestamp;
use crate::ports::DlqStore;

use super::handlers::JobHandler;

/// Retry consumer knobs.
#[derive(Debug, Clone)]
pub struct DlqRetryConfig {
    /// Pass interval.
    pub retry_interval: Duration,
    /// Entries per pass.
    pub batch_size: u32,
    /// DLQ-stage retry cap.
    pub max_retry_count: u32,
    /// Backoff multiplier between DLQ retries.
    pub backoff_factor: f64,
}

impl Default for DlqRetryConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5 * 60),
            batch_size: 10,
            max_retry_count: 5,
            backoff_factor: 2.0,
        }
    }
}

/// Second-stage consumer over the DLQ store.
pub struct DlqRetryConsumer {
    store: Arc<dyn DlqStore>,
    handler: Arc<dyn JobHandler>,
    config: DlqRetryConfig,
    cancel: CancellationToken,
}

impl DlqRetryConsumer {
    pub fn new(
        store: Arc<dyn DlqStore>,
        handler: Arc<dyn JobHandler>,
        config: DlqRetryConfig,
        root: &CancellationToken,
    ) -> Self {
        Self {
            store,
            handler,
            config,
            cancel: root.child_token(),
        }
    }

    /// Runs until root cancellation.
    pub async fn run(self) {
        tracing::info!("dlq retry consumer started");
        let mut ticker = tokio::time::interval(self.config.retry_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("dlq retry consumer stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.process_batch().await {
                        tracing::error!(error = %err, "dlq retry pass failed");
                    }
                }
            }
        }
    }

    /// One retry pass. Exposed for tests.
    pub async fn process_batch(&self) -> Result<usize, crate::domain::foundation::AppError> {
        let now = Timestamp::now();

        let swept = self.store.sweep_expired(now).await?;
        if swept > 0 {
            tracing::info!(swept, "dlq entries past retention removed");
        }

        let due = self
            .store
            .due_for_retry(self.config.max_retry_count, self.config.batch_size, now)
            .await?;

        if due.is_empty() {
            tracing::debug!("no dlq jobs to process");
            return Ok(0);
        }

        tracing::info!(count = due.len(), "processing dlq jobs");

        let mut retried = 0;
        for entry in due {
            self.retry_one(entry).await;
            retried += 1;
        }

        Ok(retried)
    }

    async fn retry_one(&self, entry: DlqJob) {
        if let Err(err) = self.store.mark_processing(&entry.id).await {
            tracing::error!(job_id = %entry.job_id, error = %err, "failed to mark dlq entry processing");
            return;
        }

        // Fresh attempt: the embedded job's in-queue retry counter resets.
        let job = match entry.original_job() {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(job_id = %entry.job_id, error = %err, "dlq payload unparseable");
                if let Err(err) = self
                    .store
                    .mark_invalid_payload(&entry.id, &err.to_string())
                    .await
                {
                    tracing::error!(job_id = %entry.job_id, error = %err, "failed to mark invalid payload");
                }
                return;
            }
        };

        match self.handler.handle(&job).await {
            Ok(()) => {
                if let Err(err) = self.store.mark_completed(&entry.id).await {
                    tracing::error!(job_id = %entry.job_id, error = %err, "failed to mark dlq entry completed");
                } else {
                    tracing::info!(
                        job_id = %entry.job_id,
                        job_type = %entry.job_type,
                        dlq_retries = entry.retry_count,
                        "dlq job successfully retried"
                    );
                }
            }
            Err(err) => self.handle_retry_failure(&entry, &err.to_string()).await,
        }
    }

    async fn handle_retry_failure(&self, entry: &DlqJob, error_msg: &str) {
        let new_count = entry.retry_count + 1;

        if new_count >= self.config.max_retry_count {
            if let Err(err) = self
                .store
                .mark_permanently_failed(&entry.id, error_msg)
                .await
            {
                tracing::error!(job_id = %entry.job_id, error = %err, "failed to mark permanent failure");
                return;
            }
            tracing::error!(
                job_id = %entry.job_id,
                job_type = %entry.job_type,
                dlq_retries = new_count,
                "dlq job permanently failed after max retries"
            );
            return;
        }

        // next delay = interval * factor^count
        let backoff = self
            .config
            .retry_interval
            .mul_f64(self.config.backoff_factor.powi(new_count as i32));
        let next_retry_at = Timestamp::now().plus_secs(backoff.as_secs() as i64);

        if let Err(err) = self
            .store
            .mark_failed(&entry.id, new_count, error_msg, Some(next_retry_at))
            .await
        {
            tracing::error!(job_id = %entry.job_id, error = %err, "failed to schedule dlq retry");
            return;
        }

        tracing::warn!(
            job_id = %entry.job_id,
            job_type = %entry.job_type,
            dlq_retries = new_count,
            next_retry_at = %next_retry_at,
            "dlq job scheduled for retry"
        );
    }
}
