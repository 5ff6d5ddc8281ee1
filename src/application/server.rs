//! Server assembly and graceful shutdown.
//!
//! Builds the router, spawns the background consumers (hub sweeper,
//! upgrader janitor, worker pool, DLQ capture, DLQ retry), serves until the
//! root cancellation token fires, then drains: the listener stops accepting,
//! in-flight requests get the grace period, the worker pool requeues its
//! channel, and the hub closes every socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Router};
use tokio::task::JoinSet;

use crate::adapters::auth::TokenService;
use crate::adapters::http::chat::{chat_routes, ChatAppState};
use crate::adapters::http::hub::{hub_routes, HubAppState};
use crate::adapters::http::middleware::{
    fingerprint_middleware, request_id_middleware, AuthState,
};
use crate::adapters::http::user::{user_routes, UserAppState};
use crate::adapters::websocket::{
    ws_handler, ChatUpgrader, ConnectionAuthenticator, ConnectionLimits, OriginPolicy,
    RoomAccessValidator, UpgraderState,
};
use crate::domain::foundation::{AppError, ErrorCode, RoomId, UserId};
use crate::domain::room::is_active_member;
use crate::ports::RoomStore;
use crate::workers::{DlqCapture, DlqRetryConfig, DlqRetryConsumer, JobRouter, WorkerPool, WorkerPoolConfig};

use super::state::AppState;

/// Socket-handshake authenticator over the same token service the HTTP
/// middleware uses.
struct TokenAuthenticator {
    tokens: Arc<TokenService>,
}

#[async_trait]
impl ConnectionAuthenticator for TokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, AppError> {
        Ok(self.tokens.verify(token)?.user_id())
    }
}

/// Socket-handshake room check against the relational store.
struct MembershipValidator {
    rooms: Arc<dyn RoomStore>,
}

#[async_trait]
impl RoomAccessValidator for MembershipValidator {
    async fn can_join(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, AppError> {
        match self.rooms.members(room_id).await {
            Ok(members) => Ok(is_active_member(&members, user_id)),
            Err(err) if err.code == ErrorCode::RoomNotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Cut off requests that outlive the configured deadline. The websocket
/// route is mounted outside this layer; upgraded connections are
/// long-lived by design.
async fn timeout_middleware(
    State(deadline): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => (StatusCode::REQUEST_TIMEOUT, "request timed out").into_response(),
    }
}

/// Assemble the full router.
pub fn build_router(state: &Arc<AppState>) -> Router {
    let auth = AuthState {
        tokens: Arc::clone(&state.tokens),
        sessions: Arc::clone(&state.sessions),
    };

    let upgrader: UpgraderState = Arc::new(
        ChatUpgrader::new(
            Arc::clone(&state.hub),
            Arc::new(TokenAuthenticator {
                tokens: Arc::clone(&state.tokens),
            }),
            ConnectionLimits::default(),
        )
        .with_room_validator(Arc::new(MembershipValidator {
            rooms: Arc::clone(&state.rooms),
        }))
        .with_origin_policy(OriginPolicy {
            allow_local: true,
            allowed: state.config.server.allowed_origins_list(),
        }),
    );

    let request_deadline = Duration::from_secs(state.config.server.request_timeout_secs);

    let api = Router::new()
        .merge(user_routes(UserAppState {
            service: Arc::clone(&state.users),
        }))
        .merge(chat_routes(
            ChatAppState {
                service: Arc::clone(&state.chat),
            },
            auth,
        ))
        .merge(hub_routes(HubAppState {
            hub: Arc::clone(&state.hub),
        }))
        .layer(middleware::from_fn_with_state(
            request_deadline,
            timeout_middleware,
        ));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", api)
        .route("/ws/rooms/{room_id}", get(ws_handler).with_state(upgrader))
        .layer(middleware::from_fn(fingerprint_middleware))
        .layer(middleware::from_fn(request_id_middleware))
}

/// Spawn the background consumers onto `tasks`.
pub fn spawn_background(state: &Arc<AppState>, tasks: &mut JoinSet<()>) {
    let handler = Arc::new(JobRouter::new(
        Arc::clone(&state.hub),
        Arc::clone(&state.cache),
        Arc::clone(&state.mailer) as _,
        state.config.server.app_name.clone(),
    ));

    let pool = WorkerPool::new(
        Arc::clone(&state.queue),
        Arc::clone(&handler) as _,
        WorkerPoolConfig::default(),
        &state.root_cancel,
    );
    tasks.spawn(pool.run());

    let capture = DlqCapture::new(
        Arc::clone(&state.queue),
        Arc::clone(&state.dlq_store),
        &state.root_cancel,
    );
    tasks.spawn(capture.run());

    let retry = DlqRetryConsumer::new(
        Arc::clone(&state.dlq_store),
        handler as _,
        DlqRetryConfig::default(),
        &state.root_cancel,
    );
    tasks.spawn(retry.run());

    tasks.spawn(Arc::clone(&state.hub).run_sweeper());
}

/// Serve until root cancellation, then drain within the grace period.
pub async fn run(state: Arc<AppState>) -> Result<(), AppError> {
    let router = build_router(&state);

    let mut tasks = JoinSet::new();
    spawn_background(&state, &mut tasks);

    let addr = state
        .config
        .server
        .socket_addr()
        .map_err(|e| AppError::new(ErrorCode::Internal, e.to_string()))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::new(ErrorCode::Internal, format!("bind {}: {}", addr, e)))?;

    tracing::info!(%addr, "server listening");

    let shutdown = state.root_cancel.clone();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| AppError::new(ErrorCode::Internal, format!("serve: {}", e)))?;

    // Listener is closed; give the consumers the grace period to drain,
    // then close every socket.
    let grace = Duration::from_secs(state.config.server.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::warn!("shutdown grace elapsed with consumers still running");
        tasks.abort_all();
    }

    state.hub.close().await;

    tracing::info!("server stopped");
    Ok(())
}
