//! PostgreSQL implementation of MessageStore.
//!
//! The message log lives in its own database. Ids are ULID strings, so
//! `WHERE id < cursor ORDER BY id DESC` walks history newest-first without a
//! time column in the index. Flexible sub-documents (reply target,
//! attachments, edit history) are JSONB columns.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::foundation::{AppError, ErrorCode, MessageId, RoomId, Timestamp, UserId};
use crate::domain::message::{Attachment, EditEntry, Message, ReplyTo};
use crate::ports::{MessageEdit, MessagePage, MessageStore};

/// PostgreSQL implementation of MessageStore.
#[derive(Clone)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn insert(&self, message: &Message) -> Result<(), AppError> {
        let reply_to = message
            .reply_to
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;
        let attachments = serde_json::to_value(&message.attachments)
            .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;
        let edit_history = serde_json::to_value(&message.edit_history)
            .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, room_id, sender_id, receiver_id, content,
                is_read, is_edited, reply_to, attachments, edit_history,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(message.id.encode())
        .bind(message.room_id.as_uuid())
        .bind(message.sender_id.as_str())
        .bind(message.receiver_id.as_str())
        .bind(&message.content)
        .bind(message.is_read)
        .bind(message.is_edited)
        .bind(reply_to)
        .bind(attachments)
        .bind(edit_history)
        .bind(message.created_at.as_datetime())
        .bind(message.updated_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(AppError::database)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Message, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, room_id, sender_id, receiver_id, content,
                   is_read, is_edited, reply_to, attachments, edit_history,
                   created_at, updated_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id.encode())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::database)?;

        match row {
            Some(row) => row_to_message(row),
            None => Err(
                AppError::new(ErrorCode::MessageNotFound, "message not found or deleted")
                    .with_field("message_id"),
            ),
        }
    }

    async fn page(
        &self,
        room_id: &RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<MessagePage, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, room_id, sender_id, receiver_id, content,
                   is_read, is_edited, reply_to, attachments, edit_history,
                   created_at, updated_at
            FROM messages
            WHERE room_id = $1
              AND ($2::text IS NULL OR id < $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(room_id.as_uuid())
        .bind(before.map(|id| id.encode()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::database)?;

        let fetched = rows.len();
        let mut messages = rows
            .into_iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        // Fetched newest-first; callers read history oldest-first.
        messages.reverse();

        Ok(MessagePage {
            next_cursor: messages.first().map(|m| m.id),
            has_more: fetched == limit as usize,
            messages,
        })
    }

    async fn mark_read(&self, id: &MessageId) -> Result<(), AppError> {
        sqlx::query("UPDATE messages SET is_read = TRUE WHERE id = $1")
            .bind(id.encode())
            .execute(&self.pool)
            .await
            .map_err(AppError::database)?;

        Ok(())
    }

    async fn apply_edit(
        &self,
        edit: &MessageEdit,
        expected_updated_at: Option<Timestamp>,
    ) -> Result<(), AppError> {
        let entry = serde_json::to_value(&edit.entry)
            .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;

        // The optimistic predicate: the row matches only while its
        // updated_at is exactly the state the caller loaded.
        let result = sqlx::query(
            r#"
            UPDATE messages SET
                content = $2,
                is_edited = TRUE,
                updated_at = $3,
                edit_history = edit_history || $4::jsonb
            WHERE id = $1
              AND (
                    ($5::timestamptz IS NULL AND updated_at IS NULL)
                 OR ($5::timestamptz IS NOT NULL AND updated_at <= $5)
              )
            "#,
        )
        .bind(edit.message_id.encode())
        .bind(&edit.new_content)
        .bind(edit.edited_at.as_datetime())
        .bind(entry)
        .bind(expected_updated_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(AppError::database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::new(
                ErrorCode::ConcurrentUpdate,
                "message was modified by another operation",
            ));
        }

        Ok(())
    }
}

fn row_to_message(row: sqlx::postgres::PgRow) -> Result<Message, AppError> {
    let id: String = row.try_get("id").map_err(AppError::database)?;
    let id: MessageId = id
        .parse()
        .map_err(|e| AppError::new(ErrorCode::Internal, format!("bad message id: {}", e)))?;

    let reply_to: Option<serde_json::Value> =
        row.try_get("reply_to").map_err(AppError::database)?;
    let reply_to: Option<ReplyTo> = reply_to
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;

    let attachments: serde_json::Value =
        row.try_get("attachments").map_err(AppError::database)?;
    let attachments: Vec<Attachment> = serde_json::from_value(attachments)
        .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;

    let edit_history: serde_json::Value =
        row.try_get("edit_history").map_err(AppError::database)?;
    let edit_history: Vec<EditEntry> = serde_json::from_value(edit_history)
        .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;

    Ok(Message {
        id,
        room_id: RoomId::from_uuid(row.try_get("room_id").map_err(AppError::database)?),
        sender_id: UserId::new(
            row.try_get::<String, _>("sender_id")
                .map_err(AppError::database)?,
        ),
        receiver_id: UserId::new(
            row.try_get::<String, _>("receiver_id")
                .map_err(AppError::database)?,
        ),
        content: row.try_get("content").map_err(AppError::database)?,
        is_read: row.try_get("is_read").map_err(AppError::database)?,
        is_edited: row.try_get("is_edited").map_err(AppError::database)?,
        reply_to,
        attachments,
        edit_history,
        created_at: Timestamp::from_datetime(
            row.try_get("created_at").map_err(AppError::database)?,
        ),
        updated_at: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("updated_at")
            .map_err(AppError::database)?
            .map(Timestamp::from_datetime),
    })
}
