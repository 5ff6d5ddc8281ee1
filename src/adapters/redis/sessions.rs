//! Redis-backed refresh-session records.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::domain::foundation::{AppError, ErrorCode, UserId};
use crate::domain::refresh_session::{RefreshSession, SessionStatus};
use crate::ports::RefreshSessionStore;

fn session_key(user_id: &UserId, fingerprint: &str, jti: &str) -> String {
    format!("refresh:{}:{}:{}", user_id, fingerprint, jti)
}

/// Session records under `refresh:{user}:{fp}:{jti}` with the session's
/// remaining lifetime as TTL.
#[derive(Clone)]
pub struct RedisRefreshSessionStore {
    conn: MultiplexedConnection,
}

impl RedisRefreshSessionStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    async fn write(&self, session: &RefreshSession) -> Result<(), AppError> {
        let key = session_key(&session.user_id, &session.fingerprint, &session.jti);
        let value = serde_json::to_vec(session)
            .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        let ttl = (session.expire_at - now).max(1) as u64;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl)
            .await
            .map_err(|e| AppError::new(ErrorCode::Cache, e.to_string()))
    }
}

#[async_trait]
impl RefreshSessionStore for RedisRefreshSessionStore {
    async fn find(
        &self,
        user_id: &UserId,
        fingerprint: &str,
        jti: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn
            .get(session_key(user_id, fingerprint, jti))
            .await
            .map_err(|e| AppError::new(ErrorCode::Cache, e.to_string()))?;

        match raw {
            Some(bytes) => {
                let session = serde_json::from_slice(&bytes)
                    .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, session: &RefreshSession) -> Result<(), AppError> {
        self.write(session).await
    }

    async fn revoke(&self, session: &RefreshSession) -> Result<(), AppError> {
        let mut revoked = session.clone();
        revoked.status = SessionStatus::Revoked;
        self.write(&revoked).await
    }
}

impl std::fmt::Debug for RedisRefreshSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRefreshSessionStore").finish_non_exhaustive()
    }
}
