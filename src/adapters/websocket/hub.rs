//! Fan-out hub: client registry, broadcast, eviction, liveness.
//!
//! The hub is the sole authority on room membership. The room index and the
//! user index are denormalized views of the same registrations and are only
//! ever mutated together, inside one write critical section. Broadcasts
//! serialize the frame once, snapshot their targets under the read lock, and
//! send outside the lock with bounded parallelism.
//!
//! Slow-consumer policy: a client whose outbound channel is full at send
//! time loses the frame and is scheduled for close. Reliability comes from
//! the write path persisting before broadcasting; a reconnecting client
//! pulls history from the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::domain::foundation::{ClientId, RoomId, Timestamp, UserId};

use super::client::Client;
use super::messages::{user_status, OutgoingFrame};

/// Concurrent sends per broadcast.
const BROADCAST_PARALLELISM: usize = 50;

/// How often the liveness sweep runs.
const SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Idle time after which a client is considered dead.
const INACTIVE_THRESHOLD_SECS: i64 = 2 * 60;

/// Aggregate hub counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HubStats {
    pub total_rooms: usize,
    pub total_clients: usize,
    pub total_connections: u64,
    pub messages_sent: u64,
    pub dropped_sends: u64,
    pub last_reset: Timestamp,
}

/// Per-room counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoomStats {
    pub room_id: RoomId,
    pub exists: bool,
    pub total_connections: usize,
    pub active_connections: usize,
    pub unique_users: usize,
}

/// Both membership indices, guarded by one lock so they can never disagree.
#[derive(Default)]
struct Registry {
    rooms: HashMap<RoomId, HashMap<ClientId, Arc<Client>>>,
    users: HashMap<UserId, Vec<Arc<Client>>>,
}

#[derive(Debug)]
struct Counters {
    total_connections: u64,
    messages_sent: u64,
    dropped_sends: u64,
    last_reset: Timestamp,
}

/// Fan-out hub over all live socket sessions.
pub struct Hub {
    registry: RwLock<Registry>,
    counters: RwLock<Counters>,
    send_permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Hub {
    /// Creates a hub whose background tasks stop when `root` is cancelled.
    pub fn new(root: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            counters: RwLock::new(Counters {
                total_connections: 0,
                messages_sent: 0,
                dropped_sends: 0,
                last_reset: Timestamp::now(),
            }),
            send_permits: Arc::new(Semaphore::new(BROADCAST_PARALLELISM)),
            cancel: root.child_token(),
        })
    }

    /// Token from which per-client tokens are derived.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Adds a client to a room.
    ///
    /// Inserts into both indices under one write lock, then announces the
    /// user's presence to the other members if this is the user's first
    /// connection to the room.
    pub async fn register(&self, room_id: RoomId, client: Arc<Client>) {
        let was_online = {
            let mut registry = self.registry.write().await;

            let was_online = registry
                .rooms
                .get(&room_id)
                .map(|clients| {
                    clients
                        .values()
                        .any(|c| c.user_id == client.user_id && c.id != client.id)
                })
                .unwrap_or(false);

            registry
                .rooms
                .entry(room_id)
                .or_default()
                .insert(client.id, Arc::clone(&client));

            let user_clients = registry.users.entry(client.user_id.clone()).or_default();
            if !user_clients.iter().any(|c| c.id == client.id) {
                user_clients.push(Arc::clone(&client));
            }

            was_online
        };

        {
            let mut counters = self.counters.write().await;
            counters.total_connections += 1;
        }

        if !was_online {
            self.broadcast_user_status(room_id, &client.user_id, user_status::ONLINE)
                .await;
        }

        tracing::info!(
            room_id = %room_id,
            client_id = %client.id,
            user_id = %client.user_id,
            "ws: client registered to room"
        );
    }

    /// Removes a client from a room, dropping the room entry when empty.
    ///
    /// Announces the user offline if no other connection of theirs remains
    /// in the room.
    pub async fn unregister(&self, room_id: RoomId, client: &Client) {
        {
            let mut registry = self.registry.write().await;

            if let Some(clients) = registry.rooms.get_mut(&room_id) {
                clients.remove(&client.id);
                if clients.is_empty() {
                    registry.rooms.remove(&room_id);
                }
            }

            if let Some(user_clients) = registry.users.get_mut(&client.user_id) {
                user_clients.retain(|c| c.id != client.id);
                if user_clients.is_empty() {
                    registry.users.remove(&client.user_id);
                }
            }
        }

        if !self.is_user_online_in_room(&room_id, &client.user_id).await {
            self.broadcast_user_status(room_id, &client.user_id, user_status::OFFLINE)
                .await;
        }

        tracing::info!(
            room_id = %room_id,
            client_id = %client.id,
            user_id = %client.user_id,
            "ws: client unregistered from room"
        );
    }

    /// Broadcasts a frame to every active client in a room.
    pub async fn broadcast_to_room(&self, room_id: RoomId, frame: OutgoingFrame) {
        self.broadcast_to_room_except(room_id, frame, None).await;
    }

    /// Broadcasts a frame to a room, skipping one client (typing events skip
    /// their originator).
    pub async fn broadcast_to_room_except(
        &self,
        room_id: RoomId,
        mut frame: OutgoingFrame,
        except: Option<ClientId>,
    ) {
        frame.room_id = Some(room_id);

        let data = match frame.to_bytes() {
            Ok(data) => Arc::new(data),
            Err(err) => {
                tracing::error!(room_id = %room_id, error = %err, "ws: failed to marshal broadcast frame");
                return;
            }
        };

        // Snapshot targets; never send while holding the lock.
        let targets: Vec<Arc<Client>> = {
            let registry = self.registry.read().await;
            match registry.rooms.get(&room_id) {
                Some(clients) => clients
                    .values()
                    .filter(|c| Some(c.id) != except && c.is_active())
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };

        if targets.is_empty() {
            return;
        }

        let target_count = targets.len();
        let mut sends = JoinSet::new();
        let mut dropped = 0u64;

        for client in targets {
            let permits = Arc::clone(&self.send_permits);
            let data = Arc::clone(&data);
            sends.spawn(async move {
                let _permit = permits.acquire().await;
                let delivered = client.try_deliver(data.as_ref().clone());
                if !delivered {
                    // Slow consumer: drop the frame and evict asynchronously.
                    tracing::warn!(
                        client_id = %client.id,
                        "ws: slow consumer, dropping frame"
                    );
                    let slow = Arc::clone(&client);
                    tokio::spawn(async move { slow.close().await });
                }
                delivered
            });
        }

        while let Some(result) = sends.join_next().await {
            if let Ok(false) = result {
                dropped += 1;
            }
        }

        {
            let mut counters = self.counters.write().await;
            counters.messages_sent += target_count as u64 - dropped;
            counters.dropped_sends += dropped;
        }

        tracing::debug!(
            room_id = %room_id,
            targets = target_count,
            dropped,
            "ws: broadcast completed"
        );
    }

    /// Broadcasts a frame to every connection of one user.
    pub async fn broadcast_to_user(&self, user_id: &UserId, frame: OutgoingFrame) {
        let targets: Vec<Arc<Client>> = {
            let registry = self.registry.read().await;
            registry
                .users
                .get(user_id)
                .map(|clients| clients.iter().filter(|c| c.is_active()).cloned().collect())
                .unwrap_or_default()
        };

        if targets.is_empty() {
            return;
        }

        let data = match frame.to_bytes() {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(user_id = %user_id, error = %err, "ws: failed to marshal user frame");
                return;
            }
        };

        for client in targets {
            if !client.try_deliver(data.clone()) {
                tracing::warn!(
                    user_id = %user_id,
                    client_id = %client.id,
                    "ws: user client buffer full"
                );
            }
        }
    }

    /// Presence announcement to a room, excluding the user it concerns.
    async fn broadcast_user_status(&self, room_id: RoomId, user_id: &UserId, status: &str) {
        let frame = OutgoingFrame::user_status(room_id, user_id.clone(), status);
        let data = match frame.to_bytes() {
            Ok(data) => data,
            Err(_) => return,
        };

        let targets: Vec<Arc<Client>> = {
            let registry = self.registry.read().await;
            match registry.rooms.get(&room_id) {
                Some(clients) => clients
                    .values()
                    .filter(|c| &c.user_id != user_id && c.is_active())
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };

        for client in targets {
            let _ = client.try_deliver(data.clone());
        }
    }

    /// Whether the user has any active connection in the room.
    pub async fn is_user_online_in_room(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        let registry = self.registry.read().await;
        registry
            .rooms
            .get(room_id)
            .map(|clients| {
                clients
                    .values()
                    .any(|c| &c.user_id == user_id && c.is_active())
            })
            .unwrap_or(false)
    }

    /// Active clients in a room.
    pub async fn room_clients(&self, room_id: &RoomId) -> Vec<Arc<Client>> {
        let registry = self.registry.read().await;
        registry
            .rooms
            .get(room_id)
            .map(|clients| clients.values().filter(|c| c.is_active()).cloned().collect())
            .unwrap_or_default()
    }

    /// Active connections of one user.
    pub async fn user_clients(&self, user_id: &UserId) -> Vec<Arc<Client>> {
        let registry = self.registry.read().await;
        registry
            .users
            .get(user_id)
            .map(|clients| clients.iter().filter(|c| c.is_active()).cloned().collect())
            .unwrap_or_default()
    }

    /// Per-room statistics.
    pub async fn room_stats(&self, room_id: &RoomId) -> RoomStats {
        let registry = self.registry.read().await;
        match registry.rooms.get(room_id) {
            Some(clients) => {
                let active: Vec<_> = clients.values().filter(|c| c.is_active()).collect();
                let unique_users = active
                    .iter()
                    .map(|c| &c.user_id)
                    .collect::<std::collections::HashSet<_>>()
                    .len();

                RoomStats {
                    room_id: *room_id,
                    exists: true,
                    total_connections: clients.len(),
                    active_connections: active.len(),
                    unique_users,
                }
            }
            None => RoomStats {
                room_id: *room_id,
                exists: false,
                total_connections: 0,
                active_connections: 0,
                unique_users: 0,
            },
        }
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> HubStats {
        let (total_rooms, total_clients) = {
            let registry = self.registry.read().await;
            let clients = registry
                .rooms
                .values()
                .flat_map(|c| c.values())
                .filter(|c| c.is_active())
                .count();
            (registry.rooms.len(), clients)
        };

        let counters = self.counters.read().await;
        HubStats {
            total_rooms,
            total_clients,
            total_connections: counters.total_connections,
            messages_sent: counters.messages_sent,
            dropped_sends: counters.dropped_sends,
            last_reset: counters.last_reset,
        }
    }

    /// Runs the liveness sweep until cancellation: closes clients that have
    /// gone inactive or quiet past the idle threshold.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SWEEP_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    /// One liveness pass, exposed for tests.
    pub async fn sweep_once(&self) {
        let now = Timestamp::now().as_unix_secs();

        let stale: Vec<Arc<Client>> = {
            let registry = self.registry.read().await;
            registry
                .rooms
                .values()
                .flat_map(|clients| clients.values())
                .filter(|c| {
                    !c.is_active() || now - c.last_seen().as_unix_secs() > INACTIVE_THRESHOLD_SECS
                })
                .cloned()
                .collect()
        };

        for client in &stale {
            tracing::info!(client_id = %client.id, "ws: closing inactive client");
            client.close().await;
        }

        tracing::debug!(cleaned = stale.len(), "ws: liveness sweep completed");
    }

    /// Closes every client and stops background tasks.
    pub async fn close(&self) {
        tracing::info!("ws: shutting down hub");
        self.cancel.cancel();

        let all: Vec<Arc<Client>> = {
            let registry = self.registry.read().await;
            registry
                .rooms
                .values()
                .flat_map(|clients| clients.values())
                .cloned()
                .collect()
        };

        for client in &all {
            client.close().await;
        }

        tracing::info!(clients = all.len(), "ws: hub shutdown completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::client::ClientConfig;

    async fn hub() -> Arc<Hub> {
        Hub::new(&CancellationToken::new())
    }

    fn client(hub: &Arc<Hub>, user: &str, room: RoomId) -> Arc<Client> {
        Client::new(UserId::new(user), room, hub, ClientConfig::default())
    }

    /// Client with a single-slot outbound channel, for slow-consumer tests.
    fn cramped_client(hub: &Arc<Hub>, user: &str, room: RoomId) -> Arc<Client> {
        Client::new(
            UserId::new(user),
            room,
            hub,
            ClientConfig {
                channel_capacity: 1,
                ..ClientConfig::default()
            },
        )
    }

    fn frame() -> OutgoingFrame {
        OutgoingFrame::system(RoomId::new(), "test")
    }

    #[tokio::test]
    async fn register_tracks_both_indices() {
        let hub = hub().await;
        let room = RoomId::new();
        let c = client(&hub, "u1", room);

        hub.register(room, Arc::clone(&c)).await;

        assert_eq!(hub.room_clients(&room).await.len(), 1);
        assert_eq!(hub.user_clients(&UserId::new("u1")).await.len(), 1);
        assert!(hub.is_user_online_in_room(&room, &UserId::new("u1")).await);
    }

    #[tokio::test]
    async fn indices_never_disagree() {
        let hub = hub().await;
        let room = RoomId::new();
        let a = client(&hub, "u1", room);
        let b = client(&hub, "u1", room);

        hub.register(room, Arc::clone(&a)).await;
        hub.register(room, Arc::clone(&b)).await;

        // Every client in the room index appears in the user index.
        for c in hub.room_clients(&room).await {
            assert!(hub
                .user_clients(&c.user_id)
                .await
                .iter()
                .any(|u| u.id == c.id));
        }

        hub.unregister(room, &a).await;

        let room_ids: Vec<_> = hub.room_clients(&room).await.iter().map(|c| c.id).collect();
        let user_ids: Vec<_> = hub
            .user_clients(&UserId::new("u1"))
            .await
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(room_ids, user_ids);
        assert_eq!(room_ids, vec![b.id]);
    }

    #[tokio::test]
    async fn unregister_drops_empty_room() {
        let hub = hub().await;
        let room = RoomId::new();
        let c = client(&hub, "u1", room);

        hub.register(room, Arc::clone(&c)).await;
        hub.unregister(room, &c).await;

        let stats = hub.room_stats(&room).await;
        assert!(!stats.exists);
        assert!(hub.user_clients(&UserId::new("u1")).await.is_empty());
    }

    #[tokio::test]
    async fn double_register_is_idempotent() {
        let hub = hub().await;
        let room = RoomId::new();
        let c = client(&hub, "u1", room);

        hub.register(room, Arc::clone(&c)).await;
        hub.register(room, Arc::clone(&c)).await;

        assert_eq!(hub.room_clients(&room).await.len(), 1);
        assert_eq!(hub.user_clients(&UserId::new("u1")).await.len(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let hub = hub().await;
        let room = RoomId::new();
        let a = client(&hub, "u1", room);
        let b = client(&hub, "u2", room);

        hub.register(room, Arc::clone(&a)).await;
        hub.register(room, Arc::clone(&b)).await;

        hub.broadcast_to_room(room, frame()).await;

        assert!(a.take_outbound().await.is_some());
        assert!(b.take_outbound().await.is_some());
    }

    #[tokio::test]
    async fn broadcast_except_skips_originator() {
        let hub = hub().await;
        let room = RoomId::new();
        let a = client(&hub, "u1", room);
        let b = client(&hub, "u2", room);

        hub.register(room, Arc::clone(&a)).await;
        hub.register(room, Arc::clone(&b)).await;
        // Drain presence announcements.
        while a.take_outbound().await.is_some() {}
        while b.take_outbound().await.is_some() {}

        hub.broadcast_to_room_except(room, frame(), Some(a.id)).await;

        assert!(a.take_outbound().await.is_none());
        assert!(b.take_outbound().await.is_some());
    }

    #[tokio::test]
    async fn broadcast_to_empty_room_sends_nothing() {
        let hub = hub().await;
        let room = RoomId::new();
        let c = client(&hub, "u1", room);

        hub.register(room, Arc::clone(&c)).await;
        hub.unregister(room, &c).await;

        hub.broadcast_to_room(room, frame()).await;

        let stats = hub.stats().await;
        assert_eq!(stats.messages_sent, 0);
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped_and_counted() {
        let hub = hub().await;
        let room = RoomId::new();
        let slow = cramped_client(&hub, "u1", room);
        let fast = client(&hub, "u2", room);

        hub.register(room, Arc::clone(&slow)).await;
        hub.register(room, Arc::clone(&fast)).await;
        while slow.take_outbound().await.is_some() {}
        while fast.take_outbound().await.is_some() {}

        // Fill the slow client's single-slot channel.
        assert!(slow.try_deliver(b"occupier".to_vec()));

        hub.broadcast_to_room(room, frame()).await;

        let stats = hub.stats().await;
        assert_eq!(stats.dropped_sends, 1);
        assert_eq!(stats.messages_sent, 1);

        // The fast client still got the frame.
        assert!(fast.take_outbound().await.is_some());
    }

    #[tokio::test]
    async fn first_connection_announces_online_to_others() {
        let hub = hub().await;
        let room = RoomId::new();
        let observer = client(&hub, "u1", room);
        hub.register(room, Arc::clone(&observer)).await;

        let newcomer = client(&hub, "u2", room);
        hub.register(room, Arc::clone(&newcomer)).await;

        let raw = observer.take_outbound().await.expect("status frame");
        let frame: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(frame["type"], "user_status");
        assert_eq!(frame["data"]["status"], "online");
        assert_eq!(frame["data"]["user_id"], "u2");

        // A second connection of the same user announces nothing new.
        let second = client(&hub, "u2", room);
        hub.register(room, Arc::clone(&second)).await;
        assert!(observer.take_outbound().await.is_none());
    }

    #[tokio::test]
    async fn last_disconnect_announces_offline() {
        let hub = hub().await;
        let room = RoomId::new();
        let observer = client(&hub, "u1", room);
        let first = client(&hub, "u2", room);
        let second = client(&hub, "u2", room);

        hub.register(room, Arc::clone(&observer)).await;
        hub.register(room, Arc::clone(&first)).await;
        observer.take_outbound().await; // online announcement
        hub.register(room, Arc::clone(&second)).await;

        hub.unregister(room, &first).await;
        assert!(observer.take_outbound().await.is_none());

        hub.unregister(room, &second).await;
        let raw = observer.take_outbound().await.expect("offline frame");
        let frame: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(frame["data"]["status"], "offline");
    }

    #[tokio::test]
    async fn sweep_closes_inactive_clients() {
        let hub = hub().await;
        let room = RoomId::new();
        let c = client(&hub, "u1", room);

        hub.register(room, Arc::clone(&c)).await;
        c.backdate_last_seen(INACTIVE_THRESHOLD_SECS + 60);

        hub.sweep_once().await;

        assert!(c.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn close_cancels_every_client() {
        let hub = hub().await;
        let room = RoomId::new();
        let a = client(&hub, "u1", room);
        let b = client(&hub, "u2", room);

        hub.register(room, Arc::clone(&a)).await;
        hub.register(room, Arc::clone(&b)).await;

        hub.close().await;

        assert!(a.cancellation().is_cancelled());
        assert!(b.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn stats_track_connections() {
        let hub = hub().await;
        let room = RoomId::new();
        let a = client(&hub, "u1", room);
        let b = client(&hub, "u2", room);

        hub.register(room, Arc::clone(&a)).await;
        hub.register(room, Arc::clone(&b)).await;

        let stats = hub.stats().await;
        assert_eq!(stats.total_rooms, 1);
        assert_eq!(stats.total_clients, 2);
        assert_eq!(stats.total_connections, 2);

        let room_stats = hub.room_stats(&room).await;
        assert!(room_stats.exists);
        assert_eq!(room_stats.active_connections, 2);
        assert_eq!(room_stats.unique_users, 2);
    }
}
