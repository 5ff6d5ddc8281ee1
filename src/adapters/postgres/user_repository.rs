//! PostgreSQL implementation of UserStore.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::foundation::{AppError, ErrorCode, Timestamp, UserId};
use crate::domain::user::{User, UserFilter};
use crate::ports::UserStore;

/// PostgreSQL implementation of UserStore.
#[derive(Clone)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn insert(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.created_at.as_datetime())
        .bind(user.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.code().as_deref() == Some("23505") {
                    return AppError::new(
                        ErrorCode::DuplicateUser,
                        "username or email already taken",
                    );
                }
            }
            AppError::database(e)
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: &UserId) -> Result<User, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, is_active, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::database)?;

        match row {
            Some(row) => row_to_user(row),
            None => Err(AppError::new(ErrorCode::UserNotFound, "user not found")),
        }
    }

    async fn find_one(&self, filter: &UserFilter) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, is_active, created_at, updated_at
            FROM users
            WHERE ($1::text IS NULL OR username = $1)
              AND ($2::text IS NULL OR email = $2)
            LIMIT 1
            "#,
        )
        .bind(filter.username.as_deref())
        .bind(filter.email.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::database)?;

        row.map(row_to_user).transpose()
    }

    async fn activate(&self, id: &UserId) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE users SET is_active = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(AppError::database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::new(ErrorCode::UserNotFound, "user not found"));
        }

        Ok(())
    }
}

fn row_to_user(row: sqlx::postgres::PgRow) -> Result<User, AppError> {
    Ok(User {
        id: UserId::new(row.try_get::<String, _>("id").map_err(AppError::database)?),
        username: row.try_get("username").map_err(AppError::database)?,
        email: row.try_get("email").map_err(AppError::database)?,
        password_hash: row.try_get("password_hash").map_err(AppError::database)?,
        is_active: row.try_get("is_active").map_err(AppError::database)?,
        created_at: Timestamp::from_datetime(
            row.try_get("created_at").map_err(AppError::database)?,
        ),
        updated_at: Timestamp::from_datetime(
            row.try_get("updated_at").map_err(AppError::database)?,
        ),
    })
}
