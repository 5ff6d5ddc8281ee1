//! Write-path integration tests against in-memory stores, focused on the
//! race behavior of find-or-create and the edit window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley::application::chat_service::ChatService;
use parley::domain::foundation::{AppError, ErrorCode, MessageId, RoomId, Timestamp, UserId};
use parley::domain::job::Job;
use parley::domain::message::Message;
use parley::domain::room::{Room, RoomMember};
use parley::ports::{
    Cache, CacheError, JobQueue, MembershipUpdate, MessageEdit, MessagePage, MessageStore,
    QueueError, RoomStore,
};

// ── Store doubles with database-like uniqueness ─────────────────────────

/// Room store that enforces the one-private-room-per-pair index the way the
/// database does, including the lost-race retry.
#[derive(Default)]
struct RaceyRooms {
    rooms: Mutex<Vec<(String, Room, Vec<RoomMember>)>>,
}

impl RaceyRooms {
    fn pair_key(a: &UserId, b: &UserId) -> String {
        let (lo, hi) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
        format!("{}:{}", lo, hi)
    }

    async fn lookup(&self, key: &str) -> Option<Room> {
        self.rooms
            .lock()
            .await
            .iter()
            .find(|(k, _, _)| k == key)
            .map(|(_, room, _)| room.clone())
    }

    /// Insert unless the pair key exists; mirrors the partial unique index.
    async fn try_insert(&self, key: String, sender: &UserId, receiver: &UserId) -> Result<Room, AppError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.iter().any(|(k, _, _)| *k == key) {
            return Err(AppError::new(
                ErrorCode::DuplicateRoom,
                "private room already exists for this pair",
            ));
        }
        let room = Room::new_private(sender.clone());
        let members = vec![
            RoomMember::new(room.id, sender.clone()),
            RoomMember::new(room.id, receiver.clone()),
        ];
        rooms.push((key, room.clone(), members));
        Ok(room)
    }
}

#[async_trait]
impl RoomStore for RaceyRooms {
    async fn find_or_create_private_room(
        &self,
        sender: &UserId,
        receiver: &UserId,
    ) -> Result<Room, AppError> {
        let key = Self::pair_key(sender, receiver);

        if let Some(room) = self.lookup(&key).await {
            return Ok(room);
        }

        // Widen the window between lookup and insert so concurrent callers
        // actually race.
        tokio::task::yield_now().await;

        match self.try_insert(key.clone(), sender, receiver).await {
            Ok(room) => Ok(room),
            Err(err) if err.code == ErrorCode::DuplicateRoom => {
                match self.lookup(&key).await {
                    Some(room) => Ok(room),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn find_by_id(&self, id: &RoomId) -> Result<Room, AppError> {
        self.rooms
            .lock()
            .await
            .iter()
            .find(|(_, room, _)| room.id == *id)
            .map(|(_, room, _)| room.clone())
            .ok_or_else(|| AppError::new(ErrorCode::RoomNotFound, "room not found"))
    }

    async fn members(&self, room_id: &RoomId) -> Result<Vec<RoomMember>, AppError> {
        Ok(self
            .rooms
            .lock()
            .await
            .iter()
            .find(|(_, room, _)| room.id == *room_id)
            .map(|(_, _, members)| members.clone())
            .unwrap_or_default())
    }

    async fn update_membership(
        &self,
        _room_id: &RoomId,
        _user_id: &UserId,
        _update: MembershipUpdate,
    ) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Default)]
struct MemMessages {
    messages: Mutex<Vec<Message>>,
}

#[async_trait]
impl MessageStore for MemMessages {
    async fn insert(&self, message: &Message) -> Result<(), AppError> {
        self.messages.lock().await.push(message.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Message, AppError> {
        self.messages
            .lock()
            .await
            .iter()
            .find(|m| m.id == *id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))
    }

    async fn page(
        &self,
        room_id: &RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<MessagePage, AppError> {
        let messages = self.messages.lock().await;
        let mut page: Vec<Message> = messages
            .iter()
            .filter(|m| m.room_id == *room_id && before.map_or(true, |b| m.id < b))
            .cloned()
            .collect();
        page.sort_by_key(|m| std::cmp::Reverse(m.id));
        page.truncate(limit as usize);
        let fetched = page.len();
        page.reverse();

        Ok(MessagePage {
            next_cursor: page.first().map(|m| m.id),
            has_more: fetched == limit as usize,
            messages: page,
        })
    }

    async fn mark_read(&self, id: &MessageId) -> Result<(), AppError> {
        if let Some(m) = self.messages.lock().await.iter_mut().find(|m| m.id == *id) {
            m.is_read = true;
        }
        Ok(())
    }

    async fn apply_edit(
        &self,
        edit: &MessageEdit,
        expected_updated_at: Option<Timestamp>,
    ) -> Result<(), AppError> {
        let mut messages = self.messages.lock().await;
        match messages
            .iter_mut()
            .find(|m| m.id == edit.message_id && m.updated_at == expected_updated_at)
        {
            Some(m) => {
                m.content = edit.new_content.clone();
                m.is_edited = true;
                m.updated_at = Some(edit.edited_at);
                m.edit_history.push(edit.entry.clone());
                Ok(())
            }
            None => Err(AppError::new(
                ErrorCode::ConcurrentUpdate,
                "message was modified by another operation",
            )),
        }
    }
}

#[derive(Default)]
struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn get_bytes(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }
    async fn set_bytes(&self, _k: &str, _v: Vec<u8>, _t: Duration) -> Result<(), CacheError> {
        Ok(())
    }
    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

#[derive(Default)]
struct CountingQueue {
    jobs: Mutex<Vec<Job>>,
}

#[async_trait]
impl JobQueue for CountingQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        self.jobs.lock().await.push(job.clone());
        Ok(())
    }
    async fn schedule_retry(&self, _j: &Job, _a: i64) -> Result<(), QueueError> {
        Ok(())
    }
    async fn requeue(&self, _j: &Job) -> Result<(), QueueError> {
        Ok(())
    }
    async fn pop_lowest(&self) -> Result<Option<Vec<u8>>, QueueError> {
        Ok(None)
    }
    async fn push_dead_letter(&self, _p: Vec<u8>) -> Result<(), QueueError> {
        Ok(())
    }
    async fn pop_dead_letter(&self, _t: u64) -> Result<Option<Vec<u8>>, QueueError> {
        Ok(None)
    }
    async fn len(&self) -> Result<u64, QueueError> {
        Ok(self.jobs.lock().await.len() as u64)
    }
}

fn service(
    rooms: Arc<RaceyRooms>,
    messages: Arc<MemMessages>,
    queue: Arc<CountingQueue>,
) -> Arc<ChatService> {
    Arc::new(ChatService::new(
        rooms,
        messages,
        Arc::new(NullCache),
        queue,
    ))
}

// ── Scenarios ───────────────────────────────────────────────────────────

/// Concurrent first messages between the same pair converge on one room,
/// with every message persisted into it.
#[tokio::test]
async fn concurrent_first_messages_converge_on_one_room() {
    let rooms = Arc::new(RaceyRooms::default());
    let messages = Arc::new(MemMessages::default());
    let queue = Arc::new(CountingQueue::default());
    let svc = service(Arc::clone(&rooms), Arc::clone(&messages), Arc::clone(&queue));

    let mut tasks = Vec::new();
    for i in 0..10 {
        let svc = Arc::clone(&svc);
        tasks.push(tokio::spawn(async move {
            let (from, to) = if i % 2 == 0 {
                ("alice", "bob")
            } else {
                ("bob", "alice")
            };
            svc.send_private_message(&UserId::new(from), &UserId::new(to), &format!("m{}", i))
                .await
        }));
    }

    let mut room_ids = Vec::new();
    for task in tasks {
        let message = task.await.unwrap().expect("send must succeed");
        room_ids.push(message.room_id);
    }

    // One room, all messages in it, one broadcast job per message.
    assert_eq!(rooms.rooms.lock().await.len(), 1);
    assert!(room_ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(messages.messages.lock().await.len(), 10);
    assert_eq!(queue.jobs.lock().await.len(), 10);
}

/// The edit window: an edit inside 15 minutes lands, one outside is
/// rejected with the time_expired marker and changes nothing.
#[tokio::test]
async fn edit_window_closes_at_fifteen_minutes() {
    let rooms = Arc::new(RaceyRooms::default());
    let messages = Arc::new(MemMessages::default());
    let queue = Arc::new(CountingQueue::default());
    let svc = service(Arc::clone(&rooms), Arc::clone(&messages), queue);

    let alice = UserId::new("alice");
    let sent = svc
        .send_private_message(&alice, &UserId::new("bob"), "a")
        .await
        .unwrap();

    // Ten minutes old: still editable.
    {
        let mut stored = messages.messages.lock().await;
        let m = stored.iter_mut().find(|m| m.id == sent.id).unwrap();
        m.created_at = Timestamp::from_unix_secs(Timestamp::now().as_unix_secs() - 10 * 60);
    }

    let updated = svc
        .update_private_message(&alice, &sent.room_id, &sent.id, "b")
        .await
        .unwrap();
    assert!(updated.message.is_edited);
    assert_eq!(updated.message.edit_history.len(), 1);

    // Sixteen minutes old: rejected, state untouched.
    {
        let mut stored = messages.messages.lock().await;
        let m = stored.iter_mut().find(|m| m.id == sent.id).unwrap();
        m.created_at = Timestamp::from_unix_secs(Timestamp::now().as_unix_secs() - 16 * 60);
    }

    let err = svc
        .update_private_message(&alice, &sent.room_id, &sent.id, "c")
        .await
        .unwrap_err();
    assert_eq!(err.status(), 403);
    assert_eq!(err.field.as_deref(), Some("time_expired"));

    let stored = messages.find_by_id(&sent.id).await.unwrap();
    assert_eq!(stored.content, "b");
    assert_eq!(stored.edit_history.len(), 1);
}

/// Optimistic concurrency: of two edits loaded from the same snapshot, the
/// second returns a conflict and does not mutate the message.
#[tokio::test]
async fn stale_edit_conflicts_and_leaves_message_intact() {
    let rooms = Arc::new(RaceyRooms::default());
    let messages = Arc::new(MemMessages::default());
    let queue = Arc::new(CountingQueue::default());
    let svc = service(Arc::clone(&rooms), Arc::clone(&messages), queue);

    let alice = UserId::new("alice");
    let sent = svc
        .send_private_message(&alice, &UserId::new("bob"), "a")
        .await
        .unwrap();

    // First editor wins.
    svc.update_private_message(&alice, &sent.room_id, &sent.id, "b")
        .await
        .unwrap();

    // Second editor writes against the stale (pre-edit) snapshot.
    let stale = MessageEdit {
        message_id: sent.id,
        new_content: "c".to_string(),
        edited_at: Timestamp::now(),
        entry: parley::domain::message::EditEntry {
            message_id: sent.id,
            original_content: "a".to_string(),
            new_content: "c".to_string(),
            edited_by: alice.clone(),
            edited_at: Timestamp::now(),
        },
    };
    let err = messages.apply_edit(&stale, None).await.unwrap_err();
    assert_eq!(err.status(), 409);

    let stored = messages.find_by_id(&sent.id).await.unwrap();
    assert_eq!(stored.content, "b");
    assert_eq!(stored.edit_history.len(), 1);
}
