//! Room store port: relational rooms and memberships.

use async_trait::async_trait;

use crate::domain::foundation::{AppError, MessageId, RoomId, Timestamp, UserId};
use crate::domain::room::{Room, RoomMember};

/// Membership metadata written after a successful send.
#[derive(Debug, Clone)]
pub struct MembershipUpdate {
    pub last_read_message_id: MessageId,
    pub last_message_at: Timestamp,
}

/// Relational store for rooms and their members.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Return the private room whose member set is exactly {a, b}, creating
    /// it (room row plus both member rows, one transaction) if absent.
    ///
    /// Race-safe: concurrent first messages between the same pair converge on
    /// one room; the loser of the insert race re-runs the lookup.
    async fn find_or_create_private_room(
        &self,
        sender: &UserId,
        receiver: &UserId,
    ) -> Result<Room, AppError>;

    /// Fetch a room by id.
    ///
    /// # Errors
    ///
    /// - `RoomNotFound` if absent
    async fn find_by_id(&self, id: &RoomId) -> Result<Room, AppError>;

    /// All member rows for a room, active and departed.
    async fn members(&self, room_id: &RoomId) -> Result<Vec<RoomMember>, AppError>;

    /// Update the sender's membership metadata (last-read pointer, last
    /// message time, unread increment).
    async fn update_membership(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        update: MembershipUpdate,
    ) -> Result<(), AppError>;
}
