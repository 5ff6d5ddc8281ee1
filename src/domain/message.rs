//! Message entity and edit history.

use serde::{Deserialize, Serialize};

use super::foundation::{AppError, MessageId, RoomId, Timestamp, UserId};

/// How long after creation a message may still be edited.
pub const EDIT_WINDOW_SECS: i64 = 15 * 60;

/// Denormalized copy of the message a reply targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyTo {
    pub message_id: MessageId,
    pub content: String,
    pub sender_id: UserId,
}

/// File attachment reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: String,
    pub url: String,
}

/// One entry in a message's edit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEntry {
    pub message_id: MessageId,
    pub original_content: String,
    pub new_content: String,
    pub edited_by: UserId,
    pub edited_at: Timestamp,
}

/// A message in the document log.
///
/// The id is ordered (ULID), so `(room_id, id)` gives natural insertion
/// ordering without a secondary sort column. `updated_at` only ever advances;
/// the edit path enforces this with an optimistic predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub is_read: bool,
    pub is_edited: bool,
    pub reply_to: Option<ReplyTo>,
    pub attachments: Vec<Attachment>,
    pub edit_history: Vec<EditEntry>,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
}

impl Message {
    /// Creates a new unread message.
    ///
    /// # Errors
    ///
    /// Rejects a message addressed to its own sender.
    pub fn new(
        room_id: RoomId,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
    ) -> Result<Self, AppError> {
        if sender_id == receiver_id {
            return Err(AppError::validation(
                "receiver_id",
                "sender and receiver must differ",
            ));
        }

        Ok(Self {
            id: MessageId::new(),
            room_id,
            sender_id,
            receiver_id,
            content: content.into(),
            is_read: false,
            is_edited: false,
            reply_to: None,
            attachments: Vec::new(),
            edit_history: Vec::new(),
            created_at: Timestamp::now(),
            updated_at: None,
        })
    }

    /// Creates a reply carrying a denormalized copy of the target.
    pub fn new_reply(
        room_id: RoomId,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        target: &Message,
    ) -> Result<Self, AppError> {
        let mut msg = Self::new(room_id, sender_id, receiver_id, content)?;
        msg.reply_to = Some(ReplyTo {
            message_id: target.id,
            content: target.content.clone(),
            sender_id: target.sender_id.clone(),
        });
        Ok(msg)
    }

    /// Whether the edit window is still open at `now`.
    pub fn within_edit_window(&self, now: Timestamp) -> bool {
        now.as_unix_secs() - self.created_at.as_unix_secs() <= EDIT_WINDOW_SECS
    }
}
