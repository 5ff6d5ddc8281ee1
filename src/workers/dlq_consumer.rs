//! Dead-letter capture: queue list → durable DLQ store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::dlq::DlqJob;
use crate::domain::job::Job;
use crate::ports::{DlqStore, JobQueue};

/// Blocking-pop timeout on the dead-letter list, in seconds.
const POP_TIMEOUT_SECS: u64 = 10;

/// Consumes the queue's dead-letter list and persists each entry as a
/// pending [`DlqJob`].
pub struct DlqCapture {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn DlqStore>,
    cancel: CancellationToken,
}

impl DlqCapture {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn DlqStore>,
        root: &CancellationToken,
    ) -> Self {
        Self {
            queue,
            store,
            cancel: root.child_token(),
        }
    }

    /// Runs until root cancellation.
    pub async fn run(self) {
        tracing::info!("dlq capture started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("dlq capture stopping");
                    return;
                }
                result = self.queue.pop_dead_letter(POP_TIMEOUT_SECS) => {
                    match result {
                        Ok(Some(raw)) => self.capture_one(raw).await,
                        Ok(None) => {} // timeout, poll again
                        Err(err) => {
                            tracing::error!(error = %err, "dlq capture: pop failed");
                        }
                    }
                }
            }
        }
    }

    /// Persist one raw payload; push it back on store failure so it is not
    /// lost.
    pub async fn capture_one(&self, raw: Vec<u8>) {
        let job = match Job::from_bytes(&raw) {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(error = %err, "dlq capture: invalid job payload");
                return;
            }
        };

        tracing::error!(
            job_id = %job.id,
            job_type = %job.job_type,
            error = job.error_msg.as_deref().unwrap_or(""),
            "dlq job detected"
        );

        let entry = match DlqJob::capture(&job) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "dlq capture: serialize failed");
                return;
            }
        };

        if let Err(err) = self.store.insert(&entry).await {
            tracing::error!(job_id = %job.id, error = %err, "dlq capture: persist failed, pushing back");
            if let Err(err) = self.queue.push_dead_letter(raw).await {
                tracing::error!(job_id = %job.id, error = %err, "dlq capture: push-back failed");
            }
        } else {
            tracing::info!(job_id = %job.id, "dlq job persisted");
        }
    }
}
