//! PostgreSQL implementation of RoomStore.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::foundation::{AppError, ErrorCode, RoomId, Timestamp, UserId};
use crate::domain::room::{Room, RoomMember, RoomType};
use crate::ports::{MembershipUpdate, RoomStore};

/// PostgreSQL implementation of RoomStore.
#[derive(Clone)]
pub struct PostgresRoomStore {
    pool: PgPool,
}

impl PostgresRoomStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Normalized pair key for the private-room uniqueness index.
    fn member_pair(a: &UserId, b: &UserId) -> String {
        let (lo, hi) = if a.as_str() <= b.as_str() {
            (a, b)
        } else {
            (b, a)
        };
        format!("{}:{}", lo, hi)
    }

    async fn find_private_room(
        &self,
        sender: &UserId,
        receiver: &UserId,
    ) -> Result<Option<Room>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT r.id, r.room_type, r.created_by, r.created_at, r.updated_at, r.deleted_at
            FROM rooms r
            JOIN room_members m1 ON m1.room_id = r.id AND m1.user_id = $1
            JOIN room_members m2 ON m2.room_id = r.id AND m2.user_id = $2
            WHERE r.room_type = 'private'
              AND (SELECT COUNT(*) FROM room_members m3 WHERE m3.room_id = r.id) = 2
            "#,
        )
        .bind(sender.as_str())
        .bind(receiver.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::database)?;

        row.map(row_to_room).transpose()
    }

    async fn create_private_room(
        &self,
        sender: &UserId,
        receiver: &UserId,
    ) -> Result<Room, AppError> {
        let room = Room::new_private(sender.clone());

        let mut tx = self.pool.begin().await.map_err(AppError::database)?;

        sqlx::query(
            r#"
            INSERT INTO rooms (id, room_type, member_pair, created_by, created_at, updated_at)
            VALUES ($1, 'private', $2, $3, $4, $4)
            "#,
        )
        .bind(room.id.as_uuid())
        .bind(Self::member_pair(sender, receiver))
        .bind(sender.as_str())
        .bind(room.created_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_insert_error(e, "room"))?;

        // Member rows are created only inside the room's transaction.
        sqlx::query(
            r#"
            INSERT INTO room_members (room_id, user_id, role, joined_at, unread_count)
            VALUES ($1, $2, 'member', $3, 0), ($1, $4, 'member', $3, 0)
            "#,
        )
        .bind(room.id.as_uuid())
        .bind(sender.as_str())
        .bind(room.created_at.as_datetime())
        .bind(receiver.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_insert_error(e, "room members"))?;

        tx.commit().await.map_err(AppError::database)?;

        Ok(room)
    }
}

#[async_trait]
impl RoomStore for PostgresRoomStore {
    async fn find_or_create_private_room(
        &self,
        sender: &UserId,
        receiver: &UserId,
    ) -> Result<Room, AppError> {
        if let Some(room) = self.find_private_room(sender, receiver).await? {
            return Ok(room);
        }

        match self.create_private_room(sender, receiver).await {
            Ok(room) => Ok(room),
            Err(err) if err.code == ErrorCode::DuplicateRoom => {
                // Lost the insert race: the winner's row must now be visible.
                match self.find_private_room(sender, receiver).await? {
                    Some(room) => Ok(room),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn find_by_id(&self, id: &RoomId) -> Result<Room, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, room_type, created_by, created_at, updated_at, deleted_at
            FROM rooms
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::database)?;

        match row {
            Some(row) => row_to_room(row),
            None => Err(AppError::new(ErrorCode::RoomNotFound, "room not found")
                .with_field("room_id")),
        }
    }

    async fn members(&self, room_id: &RoomId) -> Result<Vec<RoomMember>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT room_id, user_id, role, joined_at, left_at,
                   last_read_message_id, last_message_at, unread_count
            FROM room_members
            WHERE room_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(room_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::database)?;

        rows.into_iter().map(row_to_member).collect()
    }

    async fn update_membership(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        update: MembershipUpdate,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE room_members SET
                last_read_message_id = $3,
                last_message_at = $4,
                unread_count = unread_count + 1
            WHERE room_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id.as_uuid())
        .bind(user_id.as_str())
        .bind(update.last_read_message_id.encode())
        .bind(update.last_message_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(AppError::database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::new(
                ErrorCode::NotRoomMember,
                "no membership row to update",
            ));
        }

        Ok(())
    }
}

/// Map a uniqueness violation on the private-room pair index to a conflict;
/// everything else is a database error.
fn classify_insert_error(err: sqlx::Error, what: &str) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return AppError::new(
                ErrorCode::DuplicateRoom,
                "private room already exists for this pair",
            );
        }
    }
    AppError::database(format!("failed to insert {}: {}", what, err))
}

fn row_to_room(row: sqlx::postgres::PgRow) -> Result<Room, AppError> {
    let room_type: String = row.try_get("room_type").map_err(AppError::database)?;
    let room_type: RoomType = room_type
        .parse()
        .map_err(|e: String| AppError::new(ErrorCode::Internal, e))?;

    Ok(Room {
        id: RoomId::from_uuid(row.try_get("id").map_err(AppError::database)?),
        room_type,
        created_by: UserId::new(
            row.try_get::<String, _>("created_by")
                .map_err(AppError::database)?,
        ),
        created_at: Timestamp::from_datetime(
            row.try_get("created_at").map_err(AppError::database)?,
        ),
        updated_at: Timestamp::from_datetime(
            row.try_get("updated_at").map_err(AppError::database)?,
        ),
        deleted_at: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("deleted_at")
            .map_err(AppError::database)?
            .map(Timestamp::from_datetime),
    })
}

fn row_to_member(row: sqlx::postgres::PgRow) -> Result<RoomMember, AppError> {
    let last_read: Option<String> = row
        .try_get("last_read_message_id")
        .map_err(AppError::database)?;
    let last_read = last_read
        .map(|s| s.parse())
        .transpose()
        .map_err(|e| AppError::new(ErrorCode::Internal, format!("bad message id: {}", e)))?;

    Ok(RoomMember {
        room_id: RoomId::from_uuid(row.try_get("room_id").map_err(AppError::database)?),
        user_id: UserId::new(
            row.try_get::<String, _>("user_id")
                .map_err(AppError::database)?,
        ),
        role: row.try_get("role").map_err(AppError::database)?,
        joined_at: Timestamp::from_datetime(
            row.try_get("joined_at").map_err(AppError::database)?,
        ),
        left_at: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("left_at")
            .map_err(AppError::database)?
            .map(Timestamp::from_datetime),
        last_read_message_id: last_read,
        last_message_at: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("last_message_at")
            .map_err(AppError::database)?
            .map(Timestamp::from_datetime),
        unread_count: row.try_get("unread_count").map_err(AppError::database)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_pair_is_order_independent() {
        let a = UserId::new("alice");
        let b = UserId::new("bob");
        assert_eq!(
            PostgresRoomStore::member_pair(&a, &b),
            PostgresRoomStore::member_pair(&b, &a),
        );
        assert_eq!(PostgresRoomStore::member_pair(&a, &b), "alice:bob");
    }
}
