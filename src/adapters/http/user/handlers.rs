//! HTTP handlers for account endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use axum::response::Response;
use axum::{Extension, Json};

use crate::adapters::http::middleware::{Fingerprint, RequestId};
use crate::adapters::http::response::{fail, ok};
use crate::application::user_service::UserService;
use crate::domain::foundation::{AppError, ErrorCode, UserId};
use crate::domain::refresh_session::REFRESH_TTL_SECS;

use super::dto::{RegisterRequest, UserDto, VerifiedDto, VerifyRequest};

/// Application state for account endpoints.
#[derive(Clone)]
pub struct UserAppState {
    pub service: Arc<UserService>,
}

/// POST /api/v1/users
pub async fn register(
    State(state): State<UserAppState>,
    RequestId(request_id): RequestId,
    Json(body): Json<RegisterRequest>,
) -> Response {
    match state
        .service
        .register(&body.username, &body.email, &body.password)
        .await
    {
        Ok(user) => ok(
            "registration accepted, check your mail for the code",
            UserDto::from(user),
            request_id,
        ),
        Err(err) => fail(&err, request_id),
    }
}

/// POST /api/v1/users/{userId}
///
/// Verifies the OTP for the given account. Requires the device fingerprint
/// header; the refresh token is set as an HttpOnly cookie.
pub async fn verify(
    State(state): State<UserAppState>,
    RequestId(request_id): RequestId,
    fingerprint: Option<Extension<Fingerprint>>,
    Path(user_id): Path<UserId>,
    Json(body): Json<VerifyRequest>,
) -> Response {
    let Some(Extension(Fingerprint(fingerprint))) = fingerprint else {
        return fail(
            &AppError::new(ErrorCode::Unauthenticated, "missing device fingerprint")
                .with_field("fingerprint"),
            request_id,
        );
    };

    match state
        .service
        .verify_otp(&user_id, &fingerprint, &body.otp)
        .await
    {
        Ok(tokens) => {
            let mut response = ok(
                "account verified",
                VerifiedDto {
                    user_id,
                    access_token: tokens.access,
                },
                request_id,
            );

            let cookie = format!(
                "refresh_token={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}",
                tokens.refresh, REFRESH_TTL_SECS
            );
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(SET_COOKIE, value);
            }

            response
        }
        Err(err) => fail(&err, request_id),
    }
}
