//! Refresh-token session bound to a device fingerprint.

use serde::{Deserialize, Serialize};

use super::foundation::UserId;

/// Lifetime of a refresh session in seconds (seven days).
pub const REFRESH_TTL_SECS: i64 = 7 * 24 * 3600;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Valid,
    Revoked,
}

/// One refresh token's server-side record.
///
/// Keyed by (user, fingerprint, jti); rotation revokes the old record and
/// writes a new one in the same middleware pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSession {
    pub user_id: UserId,
    pub jti: String,
    pub fingerprint: String,
    pub issued_at: i64,
    pub expire_at: i64,
    pub status: SessionStatus,
}

impl RefreshSession {
    /// Creates a valid session issued now.
    pub fn issue(user_id: UserId, jti: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        let issued_at = chrono::Utc::now().timestamp();
        Self {
            user_id,
            jti: jti.into(),
            fingerprint: fingerprint.into(),
            issued_at,
            expire_at: issued_at + REFRESH_TTL_SECS,
            status: SessionStatus::Valid,
        }
    }

    /// Whether the session can still mint new token pairs at `now`.
    pub fn is_usable_at(&self, now: i64) -> bool {
        self.status == SessionStatus::Valid && self.expire_at > now
    }
}
