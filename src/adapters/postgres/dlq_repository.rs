//! PostgreSQL implementation of DlqStore.
//!
//! Dead-lettered jobs live next to the message log. Retention is enforced by
//! [`DlqStore::sweep_expired`] rather than a store-native TTL index.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::dlq::{DlqJob, DlqStatus};
use crate::domain::foundation::{AppError, ErrorCode, JobId, Timestamp};
use crate::ports::DlqStore;

/// PostgreSQL implementation of DlqStore.
#[derive(Clone)]
pub struct PostgresDlqStore {
    pool: PgPool,
}

impl PostgresDlqStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_status(
        &self,
        id: &Uuid,
        status: DlqStatus,
        extra: &str,
    ) -> Result<(), AppError> {
        let query = format!(
            "UPDATE dlq_jobs SET status = $2, updated_at = NOW(){} WHERE id = $1",
            extra
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(AppError::database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::new(ErrorCode::Internal, "dlq entry not found"));
        }

        Ok(())
    }
}

#[async_trait]
impl DlqStore for PostgresDlqStore {
    async fn insert(&self, entry: &DlqJob) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO dlq_jobs (
                id, job_id, job_type, payload, error_msg, status,
                retry_count, original_retry_count, next_retry_at,
                created_at, updated_at, expired_at
            ) VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id)
        .bind(entry.job_id.to_string())
        .bind(&entry.job_type)
        .bind(entry.payload.get())
        .bind(entry.error_msg.as_deref())
        .bind(entry.status.as_str())
        .bind(entry.retry_count as i32)
        .bind(entry.original_retry_count as i32)
        .bind(entry.next_retry_at.map(|t| *t.as_datetime()))
        .bind(entry.created_at.as_datetime())
        .bind(entry.updated_at.as_datetime())
        .bind(entry.expire_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(AppError::database)?;

        Ok(())
    }

    async fn due_for_retry(
        &self,
        max_retries: u32,
        batch_size: u32,
        now: Timestamp,
    ) -> Result<Vec<DlqJob>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, job_type, payload::text AS payload, error_msg, status,
                   retry_count, original_retry_count, next_retry_at,
                   created_at, updated_at, completed_at, failed_at, expired_at
            FROM dlq_jobs
            WHERE status IN ('pending', 'failed')
              AND retry_count < $1
              AND (reason IS NULL OR reason <> 'invalid_payload')
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(max_retries as i32)
        .bind(now.as_datetime())
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::database)?;

        rows.into_iter().map(row_to_entry).collect()
    }

    async fn mark_processing(&self, id: &Uuid) -> Result<(), AppError> {
        self.set_status(id, DlqStatus::Processing, "").await
    }

    async fn mark_completed(&self, id: &Uuid) -> Result<(), AppError> {
        self.set_status(id, DlqStatus::Completed, ", completed_at = NOW()")
            .await
    }

    async fn mark_failed(
        &self,
        id: &Uuid,
        retry_count: u32,
        error_msg: &str,
        next_retry_at: Option<Timestamp>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE dlq_jobs SET
                status = 'failed',
                retry_count = $2,
                error_msg = $3,
                next_retry_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(retry_count as i32)
        .bind(error_msg)
        .bind(next_retry_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(AppError::database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::new(ErrorCode::Internal, "dlq entry not found"));
        }

        Ok(())
    }

    async fn mark_invalid_payload(&self, id: &Uuid, error_msg: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE dlq_jobs SET
                status = 'failed',
                reason = 'invalid_payload',
                error_msg = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_msg)
        .execute(&self.pool)
        .await
        .map_err(AppError::database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::new(ErrorCode::Internal, "dlq entry not found"));
        }

        Ok(())
    }

    async fn mark_permanently_failed(&self, id: &Uuid, error_msg: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE dlq_jobs SET
                status = 'permanently_failed',
                error_msg = $2,
                failed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_msg)
        .execute(&self.pool)
        .await
        .map_err(AppError::database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::new(ErrorCode::Internal, "dlq entry not found"));
        }

        Ok(())
    }

    async fn sweep_expired(&self, now: Timestamp) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM dlq_jobs WHERE expired_at <= $1")
            .bind(now.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(AppError::database)?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<HashMap<DlqStatus, u64>, AppError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM dlq_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::database)?;

        let mut stats = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status").map_err(AppError::database)?;
            let count: i64 = row.try_get("count").map_err(AppError::database)?;
            if let Ok(status) = status.parse::<DlqStatus>() {
                stats.insert(status, count as u64);
            }
        }

        Ok(stats)
    }
}

fn row_to_entry(row: sqlx::postgres::PgRow) -> Result<DlqJob, AppError> {
    let job_id: String = row.try_get("job_id").map_err(AppError::database)?;
    let job_id: JobId = job_id
        .parse()
        .map_err(|e| AppError::new(ErrorCode::Internal, format!("bad job id: {}", e)))?;

    let status: String = row.try_get("status").map_err(AppError::database)?;
    let status: DlqStatus = status
        .parse()
        .map_err(|e: String| AppError::new(ErrorCode::Internal, e))?;

    let payload: String = row.try_get("payload").map_err(AppError::database)?;
    let payload = serde_json::value::RawValue::from_string(payload)
        .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;

    let opt_ts = |name: &str| -> Result<Option<Timestamp>, AppError> {
        Ok(row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)
            .map_err(AppError::database)?
            .map(Timestamp::from_datetime))
    };

    Ok(DlqJob {
        id: row.try_get("id").map_err(AppError::database)?,
        job_id,
        job_type: row.try_get("job_type").map_err(AppError::database)?,
        payload,
        error_msg: row.try_get("error_msg").map_err(AppError::database)?,
        status,
        retry_count: row.try_get::<i32, _>("retry_count").map_err(AppError::database)? as u32,
        original_retry_count: row
            .try_get::<i32, _>("original_retry_count")
            .map_err(AppError::database)? as u32,
        next_retry_at: opt_ts("next_retry_at")?,
        created_at: Timestamp::from_datetime(
            row.try_get("created_at").map_err(AppError::database)?,
        ),
        updated_at: Timestamp::from_datetime(
            row.try_get("updated_at").map_err(AppError::database)?,
        ),
        completed_at: opt_ts("completed_at")?,
        failed_at: opt_ts("failed_at")?,
        expire_at: Timestamp::from_datetime(
            row.try_get("expired_at").map_err(AppError::database)?,
        ),
    })
}
