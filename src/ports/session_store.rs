//! Refresh-session store port.

use async_trait::async_trait;

use crate::domain::foundation::{AppError, UserId};
use crate::domain::refresh_session::RefreshSession;

/// KV-backed records binding refresh tokens to (user, fingerprint, jti).
#[async_trait]
pub trait RefreshSessionStore: Send + Sync {
    /// Fetch the session for (user, fingerprint, jti); `None` when absent.
    async fn find(
        &self,
        user_id: &UserId,
        fingerprint: &str,
        jti: &str,
    ) -> Result<Option<RefreshSession>, AppError>;

    /// Store a session under its (user, fingerprint, jti) key with the
    /// session's remaining lifetime as TTL.
    async fn put(&self, session: &RefreshSession) -> Result<(), AppError>;

    /// Mark a session revoked, keeping the record until its natural expiry.
    async fn revoke(&self, session: &RefreshSession) -> Result<(), AppError>;
}
