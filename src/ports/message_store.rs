//! Message store port: the document side of the bifurcated store.

use async_trait::async_trait;

use crate::domain::foundation::{AppError, MessageId, RoomId, Timestamp};
use crate::domain::message::{EditEntry, Message};

/// One page of a room's history, ascending by id.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<MessageId>,
    pub has_more: bool,
}

/// The mutation applied by an in-window edit.
#[derive(Debug, Clone)]
pub struct MessageEdit {
    pub message_id: MessageId,
    pub new_content: String,
    pub edited_at: Timestamp,
    pub entry: EditEntry,
}

/// Ordered message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to the log.
    async fn insert(&self, message: &Message) -> Result<(), AppError>;

    /// Fetch one message by id.
    ///
    /// # Errors
    ///
    /// - `MessageNotFound` if absent
    async fn find_by_id(&self, id: &MessageId) -> Result<Message, AppError>;

    /// Cursor-paginated history: up to `limit` messages with id < `before`
    /// (newest first internally), returned ascending.
    async fn page(
        &self,
        room_id: &RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<MessagePage, AppError>;

    /// Flip a message's read flag. Idempotent.
    async fn mark_read(&self, id: &MessageId) -> Result<(), AppError>;

    /// Apply an edit guarded by an optimistic predicate: the update only
    /// matches while the stored `updated_at` is at or before
    /// `expected_updated_at` (or both unset).
    ///
    /// # Errors
    ///
    /// - `ConcurrentUpdate` when the predicate matches zero rows
    async fn apply_edit(
        &self,
        edit: &MessageEdit,
        expected_updated_at: Option<Timestamp>,
    ) -> Result<(), AppError>;
}
