//! Write-path service: send, list, reply, mark-read, edit.
//!
//! Every mutation persists before it broadcasts: the broadcast job is
//! enqueued only after the store commit, so a client can always refetch
//! anything it saw announced. Enqueue failures are logged and swallowed:
//! the message is already durable, and failing the user request over a lost
//! notification would be worse than a delayed frame.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::{AppError, ErrorCode, MessageId, RoomId, Timestamp, UserId};
use crate::domain::job::{job_type, raw_payload, Job};
use crate::domain::message::{EditEntry, Message};
use crate::domain::room::{is_active_member, PRIVATE_ROOM_MEMBER_COUNT};
use crate::ports::{
    delete_cached, get_cached, set_cached, Cache, JobQueue, MembershipUpdate, MessageEdit,
    MessagePage, MessageStore, RoomStore,
};
use crate::workers::BroadcastMessagePayload;

/// TTL for a cached message page.
const MESSAGE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Page-size bounds for history reads.
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Broadcast job parameters: moderately urgent, three attempts, dead within
/// a minute.
const BROADCAST_PRIORITY: i64 = 2;
const BROADCAST_MAX_RETRY: u32 = 3;
const BROADCAST_TTL_SECS: i64 = 60;

fn message_cache_key(room_id: &RoomId) -> String {
    format!("chat:{}", room_id)
}

/// A page of history plus its cursor, as served to callers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageHistory {
    pub messages: Vec<Message>,
    pub next_cursor: Option<MessageId>,
    pub has_more: bool,
}

impl From<MessagePage> for MessageHistory {
    fn from(page: MessagePage) -> Self {
        Self {
            messages: page.messages,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
        }
    }
}

/// Result of an in-window edit.
#[derive(Debug, Clone)]
pub struct UpdatedMessage {
    pub message: Message,
    pub entry: EditEntry,
}

/// Orchestrates the message write path over the bifurcated store.
pub struct ChatService {
    rooms: Arc<dyn RoomStore>,
    messages: Arc<dyn MessageStore>,
    cache: Arc<dyn Cache>,
    queue: Arc<dyn JobQueue>,
}

impl ChatService {
    pub fn new(
        rooms: Arc<dyn RoomStore>,
        messages: Arc<dyn MessageStore>,
        cache: Arc<dyn Cache>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            rooms,
            messages,
            cache,
            queue,
        }
    }

    /// Send a message, creating the private room on first contact.
    pub async fn send_private_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: &str,
    ) -> Result<Message, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::validation("content", "content cannot be empty"));
        }

        let room = self
            .rooms
            .find_or_create_private_room(sender, receiver)
            .await?;

        let message = Message::new(room.id, sender.clone(), receiver.clone(), content)?;
        self.messages.insert(&message).await?;

        self.rooms
            .update_membership(
                &room.id,
                sender,
                MembershipUpdate {
                    last_read_message_id: message.id,
                    last_message_at: message.created_at,
                },
            )
            .await?;

        self.invalidate_cache(&room.id).await;
        self.enqueue_broadcast(job_type::BROADCAST_PRIVATE_MESSAGE, &message)
            .await;

        Ok(message)
    }

    /// Cursor-paginated history, newest page first, ascending within the
    /// page. Served from cache when possible.
    pub async fn get_private_messages(
        &self,
        room_id: &RoomId,
        limit: Option<u32>,
        before: Option<MessageId>,
    ) -> Result<MessageHistory, AppError> {
        // The room has one cache key, so only the default (cursor-less) view
        // is cached; deeper pages always hit the log.
        let cache_key = message_cache_key(room_id);
        let cacheable = before.is_none();

        if cacheable {
            match get_cached::<MessageHistory>(self.cache.as_ref(), &cache_key).await {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => {}
                Err(err) => tracing::warn!(%cache_key, error = %err, "cache read failed"),
            }
        }

        // Validate the room before touching the log.
        self.rooms.find_by_id(room_id).await?;

        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE).max(1);
        let page = self.messages.page(room_id, limit, before).await?;
        let history = MessageHistory::from(page);

        if cacheable {
            if let Err(err) =
                set_cached(self.cache.as_ref(), &cache_key, &history, MESSAGE_CACHE_TTL).await
            {
                tracing::warn!(%cache_key, error = %err, "cache write failed");
            }
        }

        Ok(history)
    }

    /// Reply to a message in the caller's private room. Flips the target's
    /// read flag as a side effect.
    pub async fn reply_private_message(
        &self,
        sender: &UserId,
        room_id: &RoomId,
        receiver: &UserId,
        reply_to: &MessageId,
        content: &str,
    ) -> Result<Message, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::validation("content", "content cannot be empty"));
        }

        self.rooms.find_by_id(room_id).await?;
        self.require_private_member(room_id, sender).await?;

        let target = self.messages.find_by_id(reply_to).await?;
        if target.room_id != *room_id {
            return Err(AppError::validation(
                "reply_to",
                "the message you are replying to does not belong to this room",
            ));
        }

        let message =
            Message::new_reply(*room_id, sender.clone(), receiver.clone(), content, &target)?;
        self.messages.insert(&message).await?;
        self.messages.mark_read(&target.id).await?;

        self.rooms
            .update_membership(
                room_id,
                sender,
                MembershipUpdate {
                    last_read_message_id: message.id,
                    last_message_at: message.created_at,
                },
            )
            .await?;

        self.invalidate_cache(room_id).await;
        self.enqueue_broadcast(job_type::BROADCAST_PRIVATE_MESSAGE_REPLY, &message)
            .await;

        Ok(message)
    }

    /// Mark a message read. Idempotent: an already-read message is left
    /// untouched and the call succeeds.
    pub async fn mark_private_message_as_read(
        &self,
        caller: &UserId,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<(), AppError> {
        self.require_private_member(room_id, caller).await?;

        let message = self.messages.find_by_id(message_id).await?;
        if message.room_id != *room_id {
            return Err(AppError::validation(
                "message_id",
                "the message does not belong to this room",
            ));
        }
        if message.sender_id == *caller {
            return Err(AppError::validation(
                "message_id",
                "cannot mark your own message as read",
            ));
        }

        if message.is_read {
            return Ok(());
        }

        self.invalidate_cache(room_id).await;
        self.messages.mark_read(message_id).await
    }

    /// Edit a message within the 15-minute window, guarded by optimistic
    /// concurrency on `updated_at`.
    pub async fn update_private_message(
        &self,
        caller: &UserId,
        room_id: &RoomId,
        message_id: &MessageId,
        content: &str,
    ) -> Result<UpdatedMessage, AppError> {
        let original = self.messages.find_by_id(message_id).await?;

        if original.sender_id != *caller {
            return Err(AppError::new(
                ErrorCode::Forbidden,
                "you can only update your own message",
            ));
        }
        if original.room_id != *room_id {
            return Err(AppError::new(
                ErrorCode::Forbidden,
                "the message does not belong to this room",
            ));
        }

        let now = Timestamp::now();
        if !original.within_edit_window(now) {
            return Err(AppError::new(
                ErrorCode::EditWindowExpired,
                "message edit time window expired",
            )
            .with_field("time_expired"));
        }

        let room = self.rooms.find_by_id(room_id).await?;
        if room.is_deleted() {
            return Err(AppError::new(
                ErrorCode::RoomNotFound,
                "room not found or inactive",
            ));
        }
        self.require_private_member(room_id, caller).await?;

        let new_content = content.trim();
        if new_content.is_empty() || new_content == original.content.trim() {
            return Err(AppError::validation(
                "content",
                "new content must be non-empty and different",
            ));
        }

        let entry = EditEntry {
            message_id: original.id,
            original_content: original.content.clone(),
            new_content: new_content.to_string(),
            edited_by: original.sender_id.clone(),
            edited_at: now,
        };

        let edit = MessageEdit {
            message_id: original.id,
            new_content: new_content.to_string(),
            edited_at: now,
            entry: entry.clone(),
        };

        // Zero matched rows inside surfaces as ConcurrentUpdate.
        self.messages.apply_edit(&edit, original.updated_at).await?;

        self.invalidate_cache(room_id).await;

        let mut message = original;
        message.content = new_content.to_string();
        message.is_edited = true;
        message.updated_at = Some(now);
        message.edit_history.push(entry.clone());

        self.enqueue_broadcast(job_type::BROADCAST_PRIVATE_MESSAGE_UPDATED, &message)
            .await;

        Ok(UpdatedMessage { message, entry })
    }

    /// Caller must be an active member of a room with exactly two members.
    async fn require_private_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(), AppError> {
        let members = self.rooms.members(room_id).await?;

        if members.len() != PRIVATE_ROOM_MEMBER_COUNT {
            return Err(AppError::validation(
                "room_id",
                "room must have exactly 2 members",
            ));
        }

        if !is_active_member(&members, user_id) {
            return Err(AppError::new(
                ErrorCode::NotRoomMember,
                "you are not a member of this room",
            ));
        }

        Ok(())
    }

    async fn invalidate_cache(&self, room_id: &RoomId) {
        let key = message_cache_key(room_id);
        if let Err(err) = delete_cached(self.cache.as_ref(), &key).await {
            tracing::warn!(cache_key = %key, error = %err, "cache invalidation failed");
        }
    }

    /// Enqueue the post-commit broadcast job. Failures are logged, never
    /// surfaced: the message is already persisted.
    async fn enqueue_broadcast(&self, kind: &str, message: &Message) {
        let payload = BroadcastMessagePayload {
            room_id: message.room_id,
            message_id: message.id,
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            reply_to: message.reply_to.clone(),
            edit_history: message.edit_history.clone(),
            created_at: message.created_at.as_unix_secs(),
            updated_at: message.updated_at.map(|t| t.as_unix_secs()),
        };

        let raw = match raw_payload(&payload) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(message_id = %message.id, error = %err, "broadcast payload marshal failed");
                return;
            }
        };

        let job = Job::new(
            kind,
            raw,
            BROADCAST_PRIORITY,
            BROADCAST_MAX_RETRY,
            BROADCAST_TTL_SECS,
        );

        if let Err(err) = self.queue.enqueue(&job).await {
            tracing::error!(message_id = %message.id, error = %err, "failed to enqueue broadcast job");
        }
    }
}
