//! Dead-letter queue entry and its status machine.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

use super::foundation::{JobId, Timestamp};
use super::job::Job;

/// How long a dead-lettered job is retained before the expiry sweep.
pub const DLQ_RETENTION_SECS: i64 = 7 * 24 * 3600;

/// Lifecycle of a dead-lettered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    Pending,
    Processing,
    Failed,
    Completed,
    PermanentlyFailed,
}

impl DlqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqStatus::Pending => "pending",
            DlqStatus::Processing => "processing",
            DlqStatus::Failed => "failed",
            DlqStatus::Completed => "completed",
            DlqStatus::PermanentlyFailed => "permanently_failed",
        }
    }
}

impl std::str::FromStr for DlqStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DlqStatus::Pending),
            "processing" => Ok(DlqStatus::Processing),
            "failed" => Ok(DlqStatus::Failed),
            "completed" => Ok(DlqStatus::Completed),
            "permanently_failed" => Ok(DlqStatus::PermanentlyFailed),
            other => Err(format!("unknown dlq status: {}", other)),
        }
    }
}

/// Persisted copy of a job that exhausted its in-queue retries.
///
/// `payload` holds the full serialized [`Job`] exactly as it left the queue,
/// so the retry consumer can re-drive it without loss. `retry_count` counts
/// DLQ-stage retries and is independent of the retry budget the job burned
/// inside the queue (`original_retry_count`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqJob {
    pub id: Uuid,
    pub job_id: JobId,
    pub job_type: String,
    pub payload: Box<RawValue>,
    pub error_msg: Option<String>,
    pub status: DlqStatus,
    pub retry_count: u32,
    pub original_retry_count: u32,
    pub next_retry_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub expire_at: Timestamp,
}

impl DlqJob {
    /// Captures a dead job into a pending DLQ entry with the default
    /// retention window.
    ///
    /// # Errors
    ///
    /// Fails only if the job cannot be re-serialized, which a job that was
    /// just parsed off the wire cannot.
    pub fn capture(job: &Job) -> Result<Self, serde_json::Error> {
        let now = Timestamp::now();
        Ok(Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            job_type: job.job_type.clone(),
            payload: RawValue::from_string(serde_json::to_string(job)?)?,
            error_msg: job.error_msg.clone(),
            status: DlqStatus::Pending,
            retry_count: 0,
            original_retry_count: job.retry,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            expire_at: now.plus_secs(DLQ_RETENTION_SECS),
        })
    }

    /// Parses the embedded original job, with its retry counter reset so the
    /// re-drive starts from a clean slate.
    pub fn original_job(&self) -> Result<Job, serde_json::Error> {
        let mut job: Job = serde_json::from_str(self.payload.get())?;
        job.retry = 0;
        job.error_msg = None;
        Ok(job)
    }
}
