//! Route table for account endpoints.

use axum::routing::post;
use axum::Router;

use super::handlers::{register, verify, UserAppState};

/// Account routes. Registration is open; verification only needs the
/// fingerprint header, which the global middleware extracts.
pub fn user_routes(state: UserAppState) -> Router {
    Router::new()
        .route("/users", post(register))
        .route("/users/{user_id}", post(verify))
        .with_state(state)
}
