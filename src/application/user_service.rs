//! Account use-cases: registration and OTP verification.

use std::sync::Arc;

use uuid::Uuid;

use crate::adapters::auth::{hash_password, TokenPair, TokenService};
use crate::domain::foundation::{AppError, ErrorCode, UserId};
use crate::domain::job::{job_type, raw_payload, Job};
use crate::domain::refresh_session::RefreshSession;
use crate::domain::user::{User, UserFilter};
use crate::ports::{delete_cached, get_cached, Cache, JobQueue, RefreshSessionStore, UserStore};
use crate::workers::OtpPayload;

/// OTP job parameters: urgent, three attempts, dead after ten minutes.
const OTP_JOB_PRIORITY: i64 = 1;
const OTP_JOB_MAX_RETRY: u32 = 3;
const OTP_JOB_TTL_SECS: i64 = 10 * 60;

fn otp_cache_key(user_id: &UserId) -> String {
    format!("otp:{}", user_id)
}

/// Tokens returned after successful verification.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub access: String,
    pub refresh: String,
}

/// Registration and verification flows.
pub struct UserService {
    users: Arc<dyn UserStore>,
    cache: Arc<dyn Cache>,
    queue: Arc<dyn JobQueue>,
    sessions: Arc<dyn RefreshSessionStore>,
    tokens: Arc<TokenService>,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserStore>,
        cache: Arc<dyn Cache>,
        queue: Arc<dyn JobQueue>,
        sessions: Arc<dyn RefreshSessionStore>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            users,
            cache,
            queue,
            sessions,
            tokens,
        }
    }

    /// Register an inactive account and enqueue its OTP mail.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AppError> {
        if username.trim().is_empty() {
            return Err(AppError::validation("username", "username cannot be empty"));
        }
        if !email.contains('@') {
            return Err(AppError::validation("email", "invalid email address"));
        }
        if password.len() < 8 {
            return Err(AppError::validation(
                "password",
                "password must be at least 8 characters",
            ));
        }

        if self
            .users
            .find_one(&UserFilter {
                username: Some(username.to_string()),
                email: Some(email.to_string()),
            })
            .await?
            .is_some()
        {
            return Err(AppError::new(
                ErrorCode::DuplicateUser,
                "username or email already taken",
            ));
        }

        let user = User::register(
            UserId::new(Uuid::new_v4().to_string()),
            username,
            email,
            hash_password(password)?,
        );
        self.users.insert(&user).await?;

        self.enqueue_otp(&user).await;

        Ok(user)
    }

    /// Redeem an OTP: activate the account, bind a refresh session to the
    /// device, and hand back a token pair.
    pub async fn verify_otp(
        &self,
        user_id: &UserId,
        fingerprint: &str,
        code: &str,
    ) -> Result<TokenBundle, AppError> {
        let user = self.users.find_by_id(user_id).await?;

        let key = otp_cache_key(user_id);
        let cached: Option<String> = get_cached(self.cache.as_ref(), &key)
            .await
            .map_err(|e| AppError::new(ErrorCode::Cache, e.to_string()))?;

        match cached {
            Some(expected) if expected == code => {}
            Some(_) => {
                return Err(AppError::new(ErrorCode::Unauthenticated, "incorrect code")
                    .with_field("otp"))
            }
            None => {
                return Err(AppError::new(
                    ErrorCode::Unauthenticated,
                    "code expired or never issued",
                )
                .with_field("otp"))
            }
        }

        self.users.activate(user_id).await?;
        if let Err(err) = delete_cached(self.cache.as_ref(), &key).await {
            tracing::warn!(error = %err, "failed to drop redeemed otp");
        }

        let pair = self.issue_session(user_id, &user.username, fingerprint).await?;
        Ok(TokenBundle {
            access: pair.access,
            refresh: pair.refresh,
        })
    }

    /// Issue a token pair and persist the refresh session for the device.
    pub async fn issue_session(
        &self,
        user_id: &UserId,
        username: &str,
        fingerprint: &str,
    ) -> Result<TokenPair, AppError> {
        let pair = self.tokens.issue(user_id, username)?;
        let session = RefreshSession::issue(user_id.clone(), pair.jti.clone(), fingerprint);
        self.sessions.put(&session).await?;
        Ok(pair)
    }

    async fn enqueue_otp(&self, user: &User) {
        let payload = OtpPayload {
            user_id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
        };

        let raw = match raw_payload(&payload) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(user_id = %user.id, error = %err, "otp payload marshal failed");
                return;
            }
        };

        let job = Job::new(
            job_type::CREATE_USER_OTP,
            raw,
            OTP_JOB_PRIORITY,
            OTP_JOB_MAX_RETRY,
            OTP_JOB_TTL_SECS,
        );

        if let Err(err) = self.queue.enqueue(&job).await {
            tracing::error!(user_id = %user.id, error = %err, "failed to enqueue otp job");
        }
    }
}
