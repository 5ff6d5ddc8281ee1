//! WebSocket upgrade handshake.
//!
//! Contract: check the `Origin` header against the allow-list, extract
//! `room_id` (query or trailing path segment), authenticate via the injected
//! callback, enforce the per-IP and global connection ceilings, upgrade,
//! construct a session, register it, and start its pumps. Status codes are
//! exact: 400 missing room, 401 auth failure, 403 origin or room-validator
//! rejection, 429 per-IP ceiling, 503 global ceiling.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tokio::sync::{Mutex, RwLock};

use crate::domain::foundation::{AppError, RoomId, UserId};

use super::client::{Client, ClientConfig};
use super::hub::Hub;

/// Subprotocol offered to clients.
const SUBPROTOCOL: &str = "chat-v1";

/// How often the janitor prunes idle per-IP entries.
const JANITOR_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Validates the bearer token presented during the handshake.
#[async_trait]
pub trait ConnectionAuthenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<UserId, AppError>;
}

/// Decides whether a user may join a room.
#[async_trait]
pub trait RoomAccessValidator: Send + Sync {
    async fn can_join(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, AppError>;
}

/// Connection ceilings.
#[derive(Debug, Clone)]
pub struct ConnectionLimits {
    pub max_connections: usize,
    pub connections_per_ip: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            connections_per_ip: 10,
        }
    }
}

/// Which `Origin` values may open a socket.
///
/// Requests without an Origin header (non-browser clients) pass. Local
/// origins pass while `allow_local` is set; anything else must match the
/// allow-list exactly.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    pub allow_local: bool,
    pub allowed: Vec<String>,
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self {
            allow_local: true,
            allowed: Vec::new(),
        }
    }
}

impl OriginPolicy {
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };

        if self.allow_local && (origin.contains("localhost") || origin.contains("127.0.0.1")) {
            return true;
        }

        self.allowed.iter().any(|allowed| allowed == origin)
    }
}

/// Per-IP connection counter. The outer map lock is held only to find the
/// entry; the count itself sits behind its own mutex to keep contention
/// local.
#[derive(Default)]
struct IpCounters {
    entries: RwLock<HashMap<IpAddr, Arc<Mutex<usize>>>>,
}

impl IpCounters {
    async fn entry(&self, ip: IpAddr) -> Arc<Mutex<usize>> {
        if let Some(entry) = self.entries.read().await.get(&ip) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().await;
        Arc::clone(entries.entry(ip).or_default())
    }

    /// Reserve a slot; false when the ceiling is reached.
    async fn try_acquire(&self, ip: IpAddr, ceiling: usize) -> bool {
        let entry = self.entry(ip).await;
        let mut count = entry.lock().await;
        if *count >= ceiling {
            return false;
        }
        *count += 1;
        true
    }

    async fn release(&self, ip: IpAddr) {
        if let Some(entry) = self.entries.read().await.get(&ip).cloned() {
            let mut count = entry.lock().await;
            *count = count.saturating_sub(1);
        }
    }

    /// Drop entries with no live connections.
    async fn prune(&self) {
        let mut entries = self.entries.write().await;
        let mut empty = Vec::new();
        for (ip, entry) in entries.iter() {
            if *entry.lock().await == 0 {
                empty.push(*ip);
            }
        }
        for ip in empty {
            entries.remove(&ip);
        }
    }
}

/// Everything the upgrade handler needs.
pub struct ChatUpgrader {
    hub: Arc<Hub>,
    authenticator: Arc<dyn ConnectionAuthenticator>,
    room_validator: Option<Arc<dyn RoomAccessValidator>>,
    limits: ConnectionLimits,
    origin_policy: OriginPolicy,
    per_ip: IpCounters,
    client_config: ClientConfig,
}

/// Shared handle used as axum state.
pub type UpgraderState = Arc<ChatUpgrader>;

impl ChatUpgrader {
    pub fn new(
        hub: Arc<Hub>,
        authenticator: Arc<dyn ConnectionAuthenticator>,
        limits: ConnectionLimits,
    ) -> Self {
        Self {
            hub,
            authenticator,
            room_validator: None,
            limits,
            origin_policy: OriginPolicy::default(),
            per_ip: IpCounters::default(),
            client_config: ClientConfig::default(),
        }
    }

    /// Attach a room-access validator; rejections return 403 before the
    /// upgrade happens.
    pub fn with_room_validator(mut self, validator: Arc<dyn RoomAccessValidator>) -> Self {
        self.room_validator = Some(validator);
        self
    }

    /// Replace the default origin policy (localhost only) with a configured
    /// allow-list.
    pub fn with_origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = policy;
        self
    }

    /// Runs the janitor until hub cancellation: prunes idle per-IP entries.
    pub async fn run_janitor(self: Arc<Self>) {
        let cancel = self.hub.cancellation_token().clone();
        let mut ticker = tokio::time::interval(JANITOR_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.per_ip.prune().await,
            }
        }
    }

    /// `room_id` from the query string, else the trailing path segment under
    /// `/rooms/`.
    fn extract_room_id(query: &HashMap<String, String>, uri: &Uri) -> Option<RoomId> {
        if let Some(raw) = query.get("room_id") {
            return raw.parse().ok();
        }

        let mut segments = uri.path().trim_matches('/').rsplit('/');
        let last = segments.next()?;
        match segments.next() {
            Some("rooms") => last.parse().ok(),
            _ => None,
        }
    }

    /// Bearer token from header, query, or cookie.
    fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
        if let Some(value) = headers.get("Authorization").and_then(|v| v.to_str().ok()) {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }

        if let Some(token) = query.get("token") {
            return Some(token.clone());
        }

        headers
            .get("Cookie")
            .and_then(|v| v.to_str().ok())
            .and_then(|cookies| {
                cookies.split(';').find_map(|pair| {
                    let (name, value) = pair.trim().split_once('=')?;
                    (name == "access_token").then(|| value.to_string())
                })
            })
    }

    /// Client IP: `X-Forwarded-For` first hop, then `X-Real-IP`, then the
    /// socket address.
    fn client_ip(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
        if let Some(xff) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
            if let Some(ip) = xff.split(',').next().and_then(|s| s.trim().parse().ok()) {
                return ip;
            }
        }
        if let Some(xri) = headers.get("X-Real-IP").and_then(|v| v.to_str().ok()) {
            if let Ok(ip) = xri.trim().parse() {
                return ip;
            }
        }
        peer
    }
}

/// Axum handler for `GET /ws/rooms/{room_id}` (and `?room_id=` form).
pub async fn ws_handler(
    State(upgrader): State<UpgraderState>,
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(peer): ConnectInfo<std::net::SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let origin = headers.get("Origin").and_then(|v| v.to_str().ok());
    if !upgrader.origin_policy.is_allowed(origin) {
        tracing::warn!(origin = origin.unwrap_or(""), "ws: origin rejected");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let Some(room_id) = ChatUpgrader::extract_room_id(&query, &uri) else {
        return (StatusCode::BAD_REQUEST, "room id is required").into_response();
    };

    let Some(token) = ChatUpgrader::extract_token(&headers, &query) else {
        return (StatusCode::UNAUTHORIZED, "authentication required").into_response();
    };

    let user_id = match upgrader.authenticator.authenticate(&token).await {
        Ok(user_id) => user_id,
        Err(err) => {
            tracing::warn!(error = %err, "ws: authentication failed");
            return (StatusCode::UNAUTHORIZED, "authentication failed").into_response();
        }
    };

    if let Some(validator) = &upgrader.room_validator {
        match validator.can_join(&room_id, &user_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(room_id = %room_id, user_id = %user_id, "ws: room access denied");
                return (StatusCode::FORBIDDEN, "access denied").into_response();
            }
            Err(err) => {
                tracing::error!(error = %err, "ws: room validation failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "room validation failed")
                    .into_response();
            }
        }
    }

    let ip = ChatUpgrader::client_ip(&headers, peer.ip());
    if !upgrader
        .per_ip
        .try_acquire(ip, upgrader.limits.connections_per_ip)
        .await
    {
        tracing::warn!(%ip, user_id = %user_id, "ws: per-ip connection ceiling");
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }

    if upgrader.hub.stats().await.total_clients >= upgrader.limits.max_connections {
        upgrader.per_ip.release(ip).await;
        tracing::warn!("ws: global connection ceiling");
        return (StatusCode::SERVICE_UNAVAILABLE, "server at capacity").into_response();
    }

    let max_frame = upgrader.client_config.max_frame_bytes;
    ws.protocols([SUBPROTOCOL])
        .max_message_size(max_frame)
        .on_upgrade(move |socket| async move {
            let client = Client::new(
                user_id.clone(),
                room_id,
                &upgrader.hub,
                upgrader.client_config.clone(),
            );

            tracing::info!(
                room_id = %room_id,
                user_id = %user_id,
                client_id = %client.id,
                %ip,
                "ws: connection established"
            );

            upgrader.hub.register(room_id, Arc::clone(&client)).await;
            client.spawn_pumps(socket).await;

            // Release the IP slot once the session's token fires.
            let cancelled = client.cancellation().clone();
            let upgrader = Arc::clone(&upgrader);
            tokio::spawn(async move {
                cancelled.cancelled().await;
                upgrader.per_ip.release(ip).await;
            });
        })
}
