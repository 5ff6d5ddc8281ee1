//! Room and membership entities.

use serde::{Deserialize, Serialize};

use super::foundation::{MessageId, RoomId, Timestamp, UserId};

/// A private room holds exactly two members.
pub const PRIVATE_ROOM_MEMBER_COUNT: usize = 2;

/// Kind of conversation room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Private,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Private => "private",
        }
    }
}

impl std::str::FromStr for RoomType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(RoomType::Private),
            other => Err(format!("unknown room type: {}", other)),
        }
    }
}

/// A conversation room.
///
/// `deleted_at` is a soft-deletion marker; a soft-deleted room rejects edits
/// but remains readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub room_type: RoomType,
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Room {
    /// Creates a new private room.
    pub fn new_private(created_by: UserId) -> Self {
        let now = Timestamp::now();
        Self {
            id: RoomId::new(),
            room_type: RoomType::Private,
            created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether the room has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Membership row binding a user to a room.
///
/// A user is a member while `left_at` is unset. Member rows are only ever
/// created inside the same transaction as their room row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: String,
    pub joined_at: Timestamp,
    pub left_at: Option<Timestamp>,
    pub last_read_message_id: Option<MessageId>,
    pub last_message_at: Option<Timestamp>,
    pub unread_count: i64,
}

impl RoomMember {
    /// Creates a fresh membership with the default role.
    pub fn new(room_id: RoomId, user_id: UserId) -> Self {
        Self {
            room_id,
            user_id,
            role: "member".to_string(),
            joined_at: Timestamp::now(),
            left_at: None,
            last_read_message_id: None,
            last_message_at: None,
            unread_count: 0,
        }
    }

    /// Whether the membership is still active.
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Returns true when `user` is an active member of the given member set.
pub fn is_active_member(members: &[RoomMember], user: &UserId) -> bool {
    members
        .iter()
        .any(|m| &m.user_id == user && m.is_active())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_room_starts_undeleted() {
        let room = Room::new_private(UserId::new("u1"));
        assert_eq!(room.room_type, RoomType::Private);
        assert!(!room.is_deleted());
    }

    #[test]
    fn membership_is_active_until_left() {
        let mut member = RoomMember::new(RoomId::new(), UserId::new("u1"));
        assert!(member.is_active());

        member.left_at = Some(Timestamp::now());
        assert!(!member.is_active());
    }

    #[test]
    fn is_active_member_ignores_departed_users() {
        let room_id = RoomId::new();
        let mut departed = RoomMember::new(room_id, UserId::new("u1"));
        departed.left_at = Some(Timestamp::now());
        let members = vec![departed, RoomMember::new(room_id, UserId::new("u2"))];

        assert!(!is_active_member(&members, &UserId::new("u1")));
        assert!(is_active_member(&members, &UserId::new("u2")));
        assert!(!is_active_member(&members, &UserId::new("u3")));
    }
}
