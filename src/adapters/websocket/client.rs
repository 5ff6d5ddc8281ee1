//! Per-socket connection session.
//!
//! Three cooperating tasks share a session: the write pump (outbound frames,
//! pings, newline batching), the read pump (deadline-guarded reads into a
//! bounded inbound channel), and the message pump (control-frame dispatch).
//! All three stop when the client's private cancellation token fires; the
//! token is a child of the hub's, so hub shutdown reaches every pump.
//!
//! Cleanup is idempotent: the first close flips the active flag, cancels the
//! token, and unregisters from the hub; later calls return immediately.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;

use crate::domain::foundation::{ClientId, RoomId, Timestamp, UserId};

use super::hub::Hub;
use super::messages::{frame_type, IncomingFrame, JoinRoomData, OutgoingFrame};

/// Session timing and sizing knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of the outbound and inbound channels.
    pub channel_capacity: usize,
    /// Socket write deadline.
    pub write_timeout: Duration,
    /// Read deadline, refreshed by traffic and pongs.
    pub pong_timeout: Duration,
    /// Ping interval; must undercut the pong timeout.
    pub ping_period: Duration,
    /// Maximum accepted frame size in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let pong_timeout = Duration::from_secs(60);
        Self {
            channel_capacity: 256,
            write_timeout: Duration::from_secs(10),
            pong_timeout,
            ping_period: pong_timeout.mul_f64(0.9),
            max_frame_bytes: 1 << 20,
        }
    }
}

/// One live socket session.
pub struct Client {
    pub id: ClientId,
    pub user_id: UserId,

    hub: Weak<Hub>,
    self_ref: Weak<Self>,
    room: RwLock<RoomId>,
    active: AtomicBool,
    last_seen_secs: AtomicI64,
    connected_at: Timestamp,

    outbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    inbound_tx: mpsc::Sender<IncomingFrame>,
    inbound_rx: Mutex<Option<mpsc::Receiver<IncomingFrame>>>,

    cancel: tokio_util::sync::CancellationToken,
    config: ClientConfig,
}

impl Client {
    /// Creates a session bound to a hub. The private cancellation token is a
    /// child of the hub's, so root cancellation reaches every pump. Pumps
    /// are started separately once the socket exists.
    pub fn new(
        user_id: UserId,
        room_id: RoomId,
        hub: &Arc<Hub>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
        let now = Timestamp::now();

        Arc::new_cyclic(|self_ref| Self {
            id: ClientId::new(),
            user_id,
            hub: Arc::downgrade(hub),
            self_ref: self_ref.clone(),
            room: RwLock::new(room_id),
            active: AtomicBool::new(true),
            last_seen_secs: AtomicI64::new(now.as_unix_secs()),
            connected_at: now,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            cancel: hub.cancellation_token().child_token(),
            config,
        })
    }

    /// Splits the socket and spawns the three pumps.
    pub async fn spawn_pumps(&self, socket: WebSocket) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let (sink, stream) = socket.split();

        let outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .expect("pumps started twice");
        let inbound_rx = self
            .inbound_rx
            .lock()
            .await
            .take()
            .expect("pumps started twice");

        tokio::spawn(Arc::clone(&this).write_pump(sink, outbound_rx));
        tokio::spawn(Arc::clone(&this).read_pump(stream));
        tokio::spawn(this.message_pump(inbound_rx));
    }

    /// The session's private cancellation token.
    pub fn cancellation(&self) -> &tokio_util::sync::CancellationToken {
        &self.cancel
    }

    /// Room this session currently belongs to.
    pub async fn room_id(&self) -> RoomId {
        *self.room.read().await
    }

    /// Whether the session is still live.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Last traffic or pong time.
    pub fn last_seen(&self) -> Timestamp {
        Timestamp::from_unix_secs(self.last_seen_secs.load(Ordering::Acquire))
    }

    /// When the socket connected.
    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    fn touch(&self) {
        self.last_seen_secs
            .store(Timestamp::now().as_unix_secs(), Ordering::Release);
    }

    /// Non-blocking delivery into the outbound channel.
    ///
    /// Returns false when the channel is full or closed; the caller decides
    /// whether that makes this a slow consumer.
    pub fn try_deliver(&self, data: Vec<u8>) -> bool {
        self.outbound_tx.try_send(data).is_ok()
    }

    /// Serialize and deliver a frame to this client alone. A full channel
    /// schedules the session for close, same as a failed broadcast send.
    pub fn send_frame(&self, frame: OutgoingFrame) {
        let data = match frame.to_bytes() {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(client_id = %self.id, error = %err, "ws: failed to marshal frame");
                return;
            }
        };

        if !self.try_deliver(data) {
            tracing::warn!(client_id = %self.id, "ws: send buffer full, dropping frame");
            if let Some(client) = self.self_ref.upgrade() {
                tokio::spawn(async move { client.close().await });
            }
        }
    }

    /// Idempotent teardown: flip the flag, cancel the token, leave the hub.
    pub async fn close(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.cancel.cancel();

            if let Some(hub) = self.hub.upgrade() {
                let room_id = self.room_id().await;
                hub.unregister(room_id, self).await;
            }

            tracing::info!(
                client_id = %self.id,
                user_id = %self.user_id,
                "ws: client disconnected"
            );
        }
    }

    // ── Pumps ────────────────────────────────────────────────────────────

    /// Outbound side: frames, opportunistic batching, pings.
    async fn write_pump(
        self: Arc<Self>,
        mut sink: SplitSink<WebSocket, Message>,
        mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    ) {
        let mut ticker = tokio::time::interval(self.config.ping_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }

                maybe = outbound_rx.recv() => {
                    let Some(first) = maybe else { break };

                    // Drain whatever else is already queued and join with a
                    // newline so frame boundaries survive the batching.
                    let mut payload = first;
                    let queued = outbound_rx.len();
                    for _ in 0..queued {
                        match outbound_rx.try_recv() {
                            Ok(extra) => {
                                payload.push(b'\n');
                                payload.extend_from_slice(&extra);
                            }
                            Err(_) => break,
                        }
                    }

                    let text = String::from_utf8_lossy(&payload).into_owned();
                    match timeout(self.config.write_timeout, sink.send(Message::Text(text.into()))).await {
                        Ok(Ok(())) => self.touch(),
                        Ok(Err(err)) => {
                            tracing::debug!(client_id = %self.id, error = %err, "ws: write failed");
                            break;
                        }
                        Err(_) => {
                            tracing::debug!(client_id = %self.id, "ws: write deadline exceeded");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    let ping = sink.send(Message::Ping(Default::default()));
                    match timeout(self.config.write_timeout, ping).await {
                        Ok(Ok(())) => {}
                        _ => {
                            tracing::debug!(client_id = %self.id, "ws: ping failed");
                            break;
                        }
                    }
                }
            }
        }

        self.close().await;
    }

    /// Inbound side: deadline-guarded reads into the bounded inbound channel.
    async fn read_pump(self: Arc<Self>, mut stream: SplitStream<WebSocket>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let next = match timeout(self.config.pong_timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::debug!(client_id = %self.id, "ws: read deadline exceeded");
                    break;
                }
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > self.config.max_frame_bytes {
                        tracing::warn!(client_id = %self.id, "ws: oversized frame rejected");
                        break;
                    }

                    match serde_json::from_str::<IncomingFrame>(&text) {
                        Ok(mut frame) => {
                            frame.timestamp = Timestamp::now().as_unix_secs();
                            frame.client_id = Some(self.id);

                            if self.inbound_tx.try_send(frame).is_err() {
                                tracing::warn!(
                                    client_id = %self.id,
                                    "ws: inbound buffer full, dropping frame"
                                );
                            }
                        }
                        Err(err) => {
                            tracing::debug!(client_id = %self.id, error = %err, "ws: unparseable frame");
                        }
                    }

                    self.touch();
                }
                Some(Ok(Message::Pong(_))) => self.touch(),
                Some(Ok(Message::Ping(_))) => {
                    // The protocol pong is produced by the socket layer.
                    self.touch();
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!(client_id = %self.id, "ws: binary frames not supported");
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::debug!(client_id = %self.id, "ws: client sent close frame");
                    break;
                }
                Some(Err(err)) => {
                    tracing::debug!(client_id = %self.id, error = %err, "ws: read error");
                    break;
                }
                None => break,
            }
        }

        self.close().await;
    }

    /// Control-frame dispatch.
    async fn message_pump(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<IncomingFrame>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                maybe = inbound_rx.recv() => {
                    let Some(frame) = maybe else { break };
                    self.handle_frame(frame).await;
                }
            }
        }
    }

    async fn handle_frame(&self, frame: IncomingFrame) {
        match frame.frame_type.as_str() {
            frame_type::JOIN_ROOM => self.handle_join_room(frame).await,
            frame_type::LEAVE_ROOM => self.handle_leave_room().await,
            frame_type::TYPING_START => self.handle_typing(true).await,
            frame_type::TYPING_STOP => self.handle_typing(false).await,
            frame_type::PING => self.send_frame(OutgoingFrame::pong()),
            other => {
                tracing::warn!(client_id = %self.id, frame_type = other, "ws: unknown frame type");
            }
        }
    }

    async fn handle_join_room(&self, frame: IncomingFrame) {
        let data = frame
            .data
            .as_deref()
            .and_then(|raw| serde_json::from_str::<JoinRoomData>(raw.get()).ok());
        let Some(JoinRoomData { room_id: new_room }) = data else {
            tracing::debug!(client_id = %self.id, "ws: invalid join_room data");
            return;
        };

        let Some(hub) = self.hub.upgrade() else { return };
        let Some(this) = self.self_ref.upgrade() else { return };

        let old_room = {
            let mut room = self.room.write().await;
            let old = *room;
            *room = new_room;
            old
        };

        // Joining the current room again is a registry no-op: the room index
        // is keyed by client id, so we re-register without unregistering.
        if old_room != new_room {
            hub.unregister(old_room, self).await;
        }
        hub.register(new_room, this).await;

        self.send_frame(OutgoingFrame::room_joined(new_room, self.user_id.clone()));

        tracing::info!(client_id = %self.id, room_id = %new_room, "ws: client joined room");
    }

    async fn handle_leave_room(&self) {
        let Some(hub) = self.hub.upgrade() else { return };
        let room_id = self.room_id().await;

        hub.unregister(room_id, self).await;
        self.send_frame(OutgoingFrame::room_left(room_id, self.user_id.clone()));

        tracing::info!(client_id = %self.id, room_id = %room_id, "ws: client left room");
    }

    async fn handle_typing(&self, is_typing: bool) {
        let Some(hub) = self.hub.upgrade() else { return };
        let room_id = self.room_id().await;

        hub.broadcast_to_room_except(
            room_id,
            OutgoingFrame::user_typing(room_id, self.user_id.clone(), is_typing),
            Some(self.id),
        )
        .await;
    }

    // ── Test support ─────────────────────────────────────────────────────

    /// Pops one queued outbound payload, if any. Only meaningful while the
    /// write pump has not claimed the receiver.
    #[cfg(test)]
    pub async fn take_outbound(&self) -> Option<Vec<u8>> {
        let mut guard = self.outbound_rx.lock().await;
        guard.as_mut()?.try_recv().ok()
    }

    /// Rewinds `last_seen` for liveness tests.
    #[cfg(test)]
    pub fn backdate_last_seen(&self, secs: i64) {
        self.last_seen_secs.fetch_sub(secs, Ordering::AcqRel);
    }
}
