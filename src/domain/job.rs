//! Queued job and its score-ordering rules.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::foundation::{JobId, Timestamp};

/// Priority band multiplier: priority dominates the score, the time
/// component orders within a band.
const SCORE_BAND: f64 = 1e10;

/// Well-known job type tags.
pub mod job_type {
    pub const BROADCAST_PRIVATE_MESSAGE: &str = "broadcast_private_message";
    pub const BROADCAST_PRIVATE_MESSAGE_REPLY: &str = "broadcast_private_message_reply";
    pub const BROADCAST_PRIVATE_MESSAGE_UPDATED: &str = "broadcast_private_message_updated";
    pub const CREATE_USER_OTP: &str = "create_user_otp";
}

/// A unit of deferred work in the priority queue.
///
/// `retry` counts in-queue attempts and never exceeds `max_retry`; a job past
/// `expire_at` is treated as dead regardless of its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Box<RawValue>,
    pub priority: i64,
    pub retry: u32,
    pub max_retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub created_at: i64,
    #[serde(rename = "expired_at")]
    pub expire_at: i64,
}

impl Job {
    /// Creates a job expiring `ttl_secs` from now.
    pub fn new(
        job_type: impl Into<String>,
        payload: Box<RawValue>,
        priority: i64,
        max_retry: u32,
        ttl_secs: i64,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            priority,
            retry: 0,
            max_retry,
            error_msg: None,
            created_at: now.as_unix_secs(),
            expire_at: now.plus_secs(ttl_secs).as_unix_secs(),
        }
    }

    /// Score for initial enqueue: priority band + expiry time.
    pub fn enqueue_score(&self) -> f64 {
        self.priority as f64 * SCORE_BAND + self.expire_at as f64
    }

    /// Score for a retry re-insert scheduled at `retry_at`.
    ///
    /// Future-scheduled retries naturally wait behind due work in the same
    /// priority band.
    pub fn retry_score(&self, retry_at: i64) -> f64 {
        self.priority as f64 * SCORE_BAND + retry_at as f64
    }

    /// Score for a shutdown requeue: the original creation time, so the job
    /// returns to its original position in the band.
    pub fn requeue_score(&self) -> f64 {
        self.priority as f64 * SCORE_BAND + self.created_at as f64
    }

    /// Whether the job's deadline has passed at `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expire_at
    }

    /// Whether the retry budget is exhausted.
    pub fn retries_exhausted(&self) -> bool {
        self.retry >= self.max_retry
    }

    /// Serializes the job to its wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a job from its wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Serializes a payload value into the raw form jobs carry.
pub fn raw_payload<T: Serialize>(value: &T) -> Result<Box<RawValue>, serde_json::Error> {
    RawValue::from_string(serde_json::to_string(value)?)
}
