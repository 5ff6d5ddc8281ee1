//! Route table for hub endpoints.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{broadcast_to_room, hub_stats, room_stats, user_status, HubAppState};

/// Hub introspection and admin routes.
pub fn hub_routes(state: HubAppState) -> Router {
    Router::new()
        .route("/stats", get(hub_stats))
        .route("/rooms/{room_id}/stats", get(room_stats))
        .route("/rooms/{room_id}/broadcast", post(broadcast_to_room))
        .route("/users/{user_id}/status", get(user_status))
        .with_state(state)
}
