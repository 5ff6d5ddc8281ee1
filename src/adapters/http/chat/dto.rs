//! Wire DTOs for chat endpoints.

use serde::{Deserialize, Serialize};

use crate::application::chat_service::MessageHistory;
use crate::domain::foundation::{MessageId, RoomId, Timestamp, UserId};
use crate::domain::message::{Attachment, EditEntry, Message, ReplyTo};

/// Body of `POST /chat/{receiverId}/messages`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Body of `POST /chat/{roomId}` (reply).
#[derive(Debug, Deserialize)]
pub struct ReplyMessageRequest {
    pub receiver_id: UserId,
    pub reply_to: MessageId,
    pub content: String,
}

/// Body of `PUT /chat/{roomId}/update`.
#[derive(Debug, Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

/// Query of `GET /chat/{roomId}/messages`.
#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<u32>,
    pub before: Option<MessageId>,
}

/// Query carrying the target message id for read/update endpoints.
#[derive(Debug, Deserialize)]
pub struct MessageIdQuery {
    #[serde(rename = "messageID")]
    pub message_id: MessageId,
}

/// One message on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct MessageDto {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub is_read: bool,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<EditEntry>,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl From<Message> for MessageDto {
    fn from(m: Message) -> Self {
        Self {
            message_id: m.id,
            room_id: m.room_id,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            content: m.content,
            is_read: m.is_read,
            is_edited: m.is_edited,
            reply_to: m.reply_to,
            attachments: m.attachments,
            edit_history: m.edit_history,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// Page of history on the wire.
#[derive(Debug, Serialize)]
pub struct MessagesPageDto {
    pub messages: Vec<MessageDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<MessageId>,
    pub has_more: bool,
}

impl From<MessageHistory> for MessagesPageDto {
    fn from(history: MessageHistory) -> Self {
        Self {
            messages: history.messages.into_iter().map(MessageDto::from).collect(),
            next_cursor: history.next_cursor,
            has_more: history.has_more,
        }
    }
}
