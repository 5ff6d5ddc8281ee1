//! HTTP handlers for hub introspection and admin broadcast.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use crate::adapters::http::middleware::RequestId;
use crate::adapters::http::response::ok;
use crate::adapters::websocket::{Hub, OutgoingFrame};
use crate::domain::foundation::{RoomId, UserId};

/// Application state for hub endpoints.
#[derive(Clone)]
pub struct HubAppState {
    pub hub: Arc<Hub>,
}

/// Body of the admin broadcast endpoint.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub content: String,
}

/// GET /api/v1/stats
pub async fn hub_stats(
    State(state): State<HubAppState>,
    RequestId(request_id): RequestId,
) -> Response {
    let stats = state.hub.stats().await;
    ok("hub stats", stats, request_id)
}

/// GET /api/v1/rooms/{roomId}/stats
pub async fn room_stats(
    State(state): State<HubAppState>,
    RequestId(request_id): RequestId,
    Path(room_id): Path<RoomId>,
) -> Response {
    let stats = state.hub.room_stats(&room_id).await;
    ok("room stats", stats, request_id)
}

/// POST /api/v1/rooms/{roomId}/broadcast
pub async fn broadcast_to_room(
    State(state): State<HubAppState>,
    RequestId(request_id): RequestId,
    Path(room_id): Path<RoomId>,
    Json(body): Json<BroadcastRequest>,
) -> Response {
    state
        .hub
        .broadcast_to_room(room_id, OutgoingFrame::system(room_id, body.content))
        .await;

    ok(
        "broadcast dispatched",
        serde_json::json!({ "room_id": room_id }),
        request_id,
    )
}

/// GET /api/v1/users/{userId}/status
pub async fn user_status(
    State(state): State<HubAppState>,
    RequestId(request_id): RequestId,
    Path(user_id): Path<UserId>,
) -> Response {
    let clients = state.hub.user_clients(&user_id).await;
    let last_seen = clients.iter().map(|c| c.last_seen()).max();

    ok(
        "user status",
        serde_json::json!({
            "user_id": user_id,
            "online": !clients.is_empty(),
            "connections": clients.len(),
            "last_seen": last_seen,
        }),
        request_id,
    )
}
