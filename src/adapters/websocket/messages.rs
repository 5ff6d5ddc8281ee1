//! Frame vocabulary for the chat socket.
//!
//! Server→client frames share one envelope: `{ type, room_id?, sender_id?,
//! message_id?, data, timestamp }`. Client→server frames carry `{ type,
//! data }` and are stamped with receive time and client id by the read pump.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::domain::foundation::{ClientId, MessageId, RoomId, Timestamp, UserId};
use crate::domain::message::{EditEntry, ReplyTo};

/// Outgoing frame types (server → client).
pub mod frame_type {
    pub const CHAT_MESSAGE: &str = "chat_message";
    pub const MESSAGE_UPDATED: &str = "message_updated";
    pub const MESSAGE_READ: &str = "message_read";
    pub const USER_TYPING: &str = "user_typing";
    pub const USER_STATUS: &str = "user_status";
    pub const ROOM_JOINED: &str = "room_joined";
    pub const ROOM_LEFT: &str = "room_left";
    pub const SYSTEM: &str = "system";
    pub const ERROR: &str = "error";
    pub const PONG: &str = "pong";

    // Incoming frame types (client → server).
    pub const JOIN_ROOM: &str = "join_room";
    pub const LEAVE_ROOM: &str = "leave_room";
    pub const TYPING_START: &str = "typing_start";
    pub const TYPING_STOP: &str = "typing_stop";
    pub const PING: &str = "ping";
}

/// User presence values.
pub mod user_status {
    pub const ONLINE: &str = "online";
    pub const OFFLINE: &str = "offline";
    pub const AWAY: &str = "away";
}

/// Envelope for every server→client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    pub data: serde_json::Value,
    pub timestamp: i64,
}

impl OutgoingFrame {
    fn bare(frame_type: &str, data: serde_json::Value) -> Self {
        Self {
            frame_type: frame_type.to_string(),
            room_id: None,
            sender_id: None,
            message_id: None,
            data,
            timestamp: Timestamp::now().as_unix_secs(),
        }
    }

    /// Serialize once for fan-out. Broadcast paths call this exactly one
    /// time per frame and share the bytes across targets.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// New chat message frame.
    pub fn chat_message(data: ChatMessageData) -> Self {
        let mut frame = Self::bare(
            frame_type::CHAT_MESSAGE,
            serde_json::to_value(&data).unwrap_or_default(),
        );
        frame.room_id = Some(data.room_id);
        frame.sender_id = Some(data.sender_id);
        frame.message_id = Some(data.message_id);
        frame
    }

    /// Edited-message notification.
    pub fn message_updated(data: MessageUpdatedData) -> Self {
        let mut frame = Self::bare(
            frame_type::MESSAGE_UPDATED,
            serde_json::to_value(&data).unwrap_or_default(),
        );
        frame.room_id = Some(data.room_id);
        frame.sender_id = Some(data.edited_by.clone());
        frame.message_id = Some(data.message_id);
        frame
    }

    /// Read receipt.
    pub fn message_read(data: MessageReadData) -> Self {
        let mut frame = Self::bare(
            frame_type::MESSAGE_READ,
            serde_json::to_value(&data).unwrap_or_default(),
        );
        frame.room_id = Some(data.room_id);
        frame.message_id = Some(data.message_id);
        frame
    }

    /// Typing indicator, attributed to its sender.
    pub fn user_typing(room_id: RoomId, user_id: UserId, is_typing: bool) -> Self {
        let data = UserTypingData {
            room_id,
            user_id: user_id.clone(),
            is_typing,
        };
        let mut frame = Self::bare(
            frame_type::USER_TYPING,
            serde_json::to_value(&data).unwrap_or_default(),
        );
        frame.room_id = Some(room_id);
        frame.sender_id = Some(user_id);
        frame
    }

    /// Presence change.
    pub fn user_status(room_id: RoomId, user_id: UserId, status: &str) -> Self {
        let data = UserStatusData {
            room_id,
            user_id: user_id.clone(),
            status: status.to_string(),
        };
        let mut frame = Self::bare(
            frame_type::USER_STATUS,
            serde_json::to_value(&data).unwrap_or_default(),
        );
        frame.room_id = Some(room_id);
        frame.sender_id = Some(user_id);
        frame
    }

    /// Join confirmation sent back to the joining client.
    pub fn room_joined(room_id: RoomId, user_id: UserId) -> Self {
        let mut frame = Self::bare(
            frame_type::ROOM_JOINED,
            serde_json::json!({ "room_id": room_id, "user_id": user_id }),
        );
        frame.room_id = Some(room_id);
        frame.sender_id = Some(user_id);
        frame
    }

    /// Leave confirmation.
    pub fn room_left(room_id: RoomId, user_id: UserId) -> Self {
        let mut frame = Self::bare(
            frame_type::ROOM_LEFT,
            serde_json::json!({ "room_id": room_id, "user_id": user_id }),
        );
        frame.room_id = Some(room_id);
        frame.sender_id = Some(user_id);
        frame
    }

    /// Operator/system notice to a room.
    pub fn system(room_id: RoomId, content: impl Into<String>) -> Self {
        let mut frame = Self::bare(
            frame_type::SYSTEM,
            serde_json::json!({ "content": content.into() }),
        );
        frame.room_id = Some(room_id);
        frame
    }

    /// Error frame addressed to one client.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::bare(
            frame_type::ERROR,
            serde_json::json!({ "code": code, "message": message.into() }),
        )
    }

    /// Application-level pong.
    pub fn pong() -> Self {
        Self::bare(frame_type::PONG, serde_json::Value::Null)
    }
}

/// Envelope for client→server frames.
#[derive(Debug, Deserialize)]
pub struct IncomingFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(skip)]
    pub client_id: Option<ClientId>,
}

/// Payload of a `chat_message` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageData {
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub is_edited: bool,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
    pub created_at: i64,
}

/// Payload of a `message_updated` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageUpdatedData {
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub content: String,
    pub is_edited: bool,
    pub edit_history: Vec<EditEntry>,
    pub edited_by: UserId,
    pub updated_at: i64,
}

/// Payload of a `message_read` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReadData {
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub read_by: UserId,
    pub read_at: i64,
}

/// Payload of a `user_typing` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTypingData {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
}

/// Payload of a `user_status` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusData {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub status: String,
}

/// Payload of a `join_room` request.
#[derive(Debug, Deserialize)]
pub struct JoinRoomData {
    pub room_id: RoomId,
}
