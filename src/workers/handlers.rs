//! Job dispatch: translate popped jobs into hub broadcasts or OTP mail.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapters::websocket::{
    ChatMessageData, Hub, MessageUpdatedData, OutgoingFrame,
};
use crate::domain::foundation::{MessageId, RoomId, Timestamp, UserId};
use crate::domain::job::{job_type, Job};
use crate::domain::message::{EditEntry, ReplyTo};
use crate::ports::{set_cached, Cache, Mailer, OutboundMail};

/// How long a registration OTP stays redeemable.
const OTP_TTL: Duration = Duration::from_secs(10 * 60);

/// Failure taxonomy for job handling.
///
/// `Fatal` is for jobs that can never succeed (malformed payload, unknown
/// type); they go straight to the dead-letter list. `Transient` failures
/// re-enter the queue with backoff until the retry budget runs out.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("transient: {0}")]
    Transient(String),
}

/// Processes one job. Implemented by [`JobRouter`] in production and by
/// test doubles in the pool and retry-consumer tests.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// Payload shared by the three broadcast job types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessagePayload {
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<EditEntry>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Payload of a `create_user_otp` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpPayload {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
}

/// Production dispatcher, keyed by the job's type tag.
pub struct JobRouter {
    hub: Arc<Hub>,
    cache: Arc<dyn Cache>,
    mailer: Arc<dyn Mailer>,
    app_name: String,
}

impl JobRouter {
    pub fn new(
        hub: Arc<Hub>,
        cache: Arc<dyn Cache>,
        mailer: Arc<dyn Mailer>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            hub,
            cache,
            mailer,
            app_name: app_name.into(),
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(job: &Job) -> Result<T, JobError> {
        serde_json::from_str(job.payload.get())
            .map_err(|e| JobError::Fatal(format!("invalid payload: {}", e)))
    }

    async fn broadcast_message(&self, job: &Job) -> Result<(), JobError> {
        let payload: BroadcastMessagePayload = Self::parse(job)?;

        let frame = OutgoingFrame::chat_message(ChatMessageData {
            room_id: payload.room_id,
            message_id: payload.message_id,
            sender_id: payload.sender_id,
            receiver_id: payload.receiver_id,
            content: payload.content,
            is_edited: false,
            is_read: false,
            reply_to: payload.reply_to,
            created_at: payload.created_at,
        });

        self.hub.broadcast_to_room(payload.room_id, frame).await;
        Ok(())
    }

    async fn broadcast_update(&self, job: &Job) -> Result<(), JobError> {
        let payload: BroadcastMessagePayload = Self::parse(job)?;

        if payload.edit_history.is_empty() {
            tracing::warn!(
                message_id = %payload.message_id,
                room_id = %payload.room_id,
                "edit history is empty, broadcasting without it"
            );
        }

        let updated_at = payload
            .updated_at
            .unwrap_or_else(|| Timestamp::now().as_unix_secs());

        let frame = OutgoingFrame::message_updated(MessageUpdatedData {
            room_id: payload.room_id,
            message_id: payload.message_id,
            content: payload.content,
            is_edited: true,
            edit_history: payload.edit_history,
            edited_by: payload.sender_id,
            updated_at,
        });

        self.hub.broadcast_to_room(payload.room_id, frame).await;
        Ok(())
    }

    async fn create_user_otp(&self, job: &Job) -> Result<(), JobError> {
        let payload: OtpPayload = Self::parse(job)?;

        let code = generate_otp();
        let key = format!("otp:{}", payload.user_id);
        set_cached(self.cache.as_ref(), &key, &code, OTP_TTL)
            .await
            .map_err(|e| JobError::Transient(format!("otp cache write: {}", e)))?;

        let mail = OutboundMail {
            to: payload.email,
            subject: format!("[{}] Your verification code", self.app_name),
            body: format!(
                "Hi {},\n\nYour verification code is {}. It expires in 10 minutes.\n",
                payload.username, code
            ),
        };

        self.mailer
            .send(mail)
            .await
            .map_err(|e| JobError::Transient(format!("otp mail: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl JobHandler for JobRouter {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        match job.job_type.as_str() {
            job_type::BROADCAST_PRIVATE_MESSAGE | job_type::BROADCAST_PRIVATE_MESSAGE_REPLY => {
                self.broadcast_message(job).await
            }
            job_type::BROADCAST_PRIVATE_MESSAGE_UPDATED => self.broadcast_update(job).await,
            job_type::CREATE_USER_OTP => self.create_user_otp(job).await,
            other => Err(JobError::Fatal(format!("unknown job type: {}", other))),
        }
    }
}

/// Six decimal digits derived from a fresh UUID.
fn generate_otp() -> String {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    let n = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    format!("{:06}", n % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::raw_payload;
    use tokio_util::sync::CancellationToken;

    struct NullMailer;

    #[async_trait]
    impl Mailer for NullMailer {
        async fn send(&self, _mail: OutboundMail) -> Result<(), crate::domain::foundation::AppError> {
            Ok(())
        }
    }

    struct NullCache;

    #[async_trait]
    impl Cache for NullCache {
        async fn get_bytes(
            &self,
            _key: &str,
        ) -> Result<Option<Vec<u8>>, crate::ports::CacheError> {
            Ok(None)
        }

        async fn set_bytes(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Duration,
        ) -> Result<(), crate::ports::CacheError> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<(), crate::ports::CacheError> {
            Ok(())
        }
    }

    fn router() -> JobRouter {
        JobRouter::new(
            Hub::new(&CancellationToken::new()),
            Arc::new(NullCache),
            Arc::new(NullMailer),
            "parley",
        )
    }

    fn broadcast_job() -> Job {
        let payload = BroadcastMessagePayload {
            room_id: RoomId::new(),
            message_id: MessageId::new(),
            sender_id: UserId::new("u1"),
            receiver_id: UserId::new("u2"),
            content: "hi".to_string(),
            reply_to: None,
            edit_history: Vec::new(),
            created_at: 0,
            updated_at: None,
        };
        Job::new(
            job_type::BROADCAST_PRIVATE_MESSAGE,
            raw_payload(&payload).unwrap(),
            2,
            3,
            60,
        )
    }

    #[tokio::test]
    async fn broadcast_job_with_no_listeners_succeeds() {
        let router = router();
        assert!(router.handle(&broadcast_job()).await.is_ok());
    }

    #[tokio::test]
    async fn malformed_payload_is_fatal() {
        let router = router();
        let mut job = broadcast_job();
        job.payload = raw_payload(&serde_json::json!({"nope": true})).unwrap();

        match router.handle(&job).await {
            Err(JobError::Fatal(_)) => {}
            other => panic!("expected fatal error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn unknown_job_type_is_fatal() {
        let router = router();
        let mut job = broadcast_job();
        job.job_type = "launch_missiles".to_string();

        assert!(matches!(router.handle(&job).await, Err(JobError::Fatal(_))));
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..32 {
            let code = generate_otp();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn broadcast_payload_round_trips() {
        let payload = BroadcastMessagePayload {
            room_id: RoomId::new(),
            message_id: MessageId::new(),
            sender_id: UserId::new("u1"),
            receiver_id: UserId::new("u2"),
            content: "hello".to_string(),
            reply_to: None,
            edit_history: Vec::new(),
            created_at: 42,
            updated_at: None,
        };

        let json = serde_json::to_string(&payload).unwrap();
        let parsed: BroadcastMessagePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.message_id, payload.message_id);
        assert_eq!(parsed.content, payload.content);
    }
}
