//! HTTP handlers for chat endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;

use crate::adapters::http::middleware::{AuthUser, RequestId};
use crate::adapters::http::response::{fail, ok};
use crate::application::chat_service::ChatService;
use crate::domain::foundation::{RoomId, UserId};

use super::dto::{
    ListMessagesQuery, MessageDto, MessageIdQuery, MessagesPageDto, ReplyMessageRequest,
    SendMessageRequest, UpdateMessageRequest,
};

/// Application state for chat endpoints.
#[derive(Clone)]
pub struct ChatAppState {
    pub service: Arc<ChatService>,
}

/// POST /api/v1/chat/{receiverId}/messages
pub async fn send_message(
    State(state): State<ChatAppState>,
    AuthUser(sender): AuthUser,
    RequestId(request_id): RequestId,
    Path(receiver_id): Path<UserId>,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    match state
        .service
        .send_private_message(&sender, &receiver_id, &body.content)
        .await
    {
        Ok(message) => ok(
            "message sent successfully",
            MessageDto::from(message),
            request_id,
        ),
        Err(err) => fail(&err, request_id),
    }
}

/// GET /api/v1/chat/{roomId}/messages
pub async fn list_messages(
    State(state): State<ChatAppState>,
    AuthUser(_caller): AuthUser,
    RequestId(request_id): RequestId,
    Path(room_id): Path<RoomId>,
    Query(query): Query<ListMessagesQuery>,
) -> Response {
    match state
        .service
        .get_private_messages(&room_id, query.limit, query.before)
        .await
    {
        Ok(history) => ok(
            "messages fetched successfully",
            MessagesPageDto::from(history),
            request_id,
        ),
        Err(err) => fail(&err, request_id),
    }
}

/// POST /api/v1/chat/{roomId}
pub async fn reply_message(
    State(state): State<ChatAppState>,
    AuthUser(sender): AuthUser,
    RequestId(request_id): RequestId,
    Path(room_id): Path<RoomId>,
    Json(body): Json<ReplyMessageRequest>,
) -> Response {
    match state
        .service
        .reply_private_message(
            &sender,
            &room_id,
            &body.receiver_id,
            &body.reply_to,
            &body.content,
        )
        .await
    {
        Ok(message) => ok(
            "reply sent successfully",
            MessageDto::from(message),
            request_id,
        ),
        Err(err) => fail(&err, request_id),
    }
}

/// PATCH /api/v1/chat/{roomId}/read?messageID=
pub async fn mark_message_read(
    State(state): State<ChatAppState>,
    AuthUser(caller): AuthUser,
    RequestId(request_id): RequestId,
    Path(room_id): Path<RoomId>,
    Query(query): Query<MessageIdQuery>,
) -> Response {
    match state
        .service
        .mark_private_message_as_read(&caller, &room_id, &query.message_id)
        .await
    {
        Ok(()) => ok(
            "message marked as read",
            serde_json::json!({ "message_id": query.message_id }),
            request_id,
        ),
        Err(err) => fail(&err, request_id),
    }
}

/// PUT /api/v1/chat/{roomId}/update?messageID=
pub async fn update_message(
    State(state): State<ChatAppState>,
    AuthUser(caller): AuthUser,
    RequestId(request_id): RequestId,
    Path(room_id): Path<RoomId>,
    Query(query): Query<MessageIdQuery>,
    Json(body): Json<UpdateMessageRequest>,
) -> Response {
    match state
        .service
        .update_private_message(&caller, &room_id, &query.message_id, &body.content)
        .await
    {
        Ok(updated) => ok(
            "message updated successfully",
            MessageDto::from(updated.message),
            request_id,
        ),
        Err(err) => fail(&err, request_id),
    }
}
