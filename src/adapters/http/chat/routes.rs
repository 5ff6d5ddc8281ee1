//! Route table for chat endpoints.
#![allow(warnings)]
use axum::middleware;
use axum::routing::get;
use axum::Router;
use axum::extract::State;
use crate::adapters::http::middleware::{AuthState, auth_middleware};

pub fn chat_routes(auth: AuthState) -> Router {
    Router::new()
        .route("/chat/ping", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(auth, |state: State<AuthState>, req, next| auth_middleware(state, req, next)))
}
