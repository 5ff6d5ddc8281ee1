//! Response envelope shared by every endpoint.
//!
//! `{ "message": ..., "data": ..., "request_id": ..., "errors": ... }`.
//! `data` is null on failure, `errors` is null on success. The request id is
//! whatever the request-id middleware stamped on the request.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::foundation::AppError;

/// Error half of the envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// The envelope itself.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub message: String,
    pub data: Option<T>,
    pub request_id: String,
    pub errors: Option<ErrorBody>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Success envelope.
    pub fn ok(message: impl Into<String>, data: T, request_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            request_id: request_id.into(),
            errors: None,
        }
    }

    /// Failure envelope from an application error.
    pub fn error(err: &AppError, request_id: impl Into<String>) -> Self {
        Self {
            message: err.message.clone(),
            data: None,
            request_id: request_id.into(),
            errors: Some(ErrorBody {
                code: err.status(),
                message: err.message.clone(),
                field: err.field.clone(),
            }),
        }
    }

    /// Render with the status implied by the payload.
    pub fn into_response(self) -> Response {
        let status = match &self.errors {
            Some(errors) => {
                StatusCode::from_u16(errors.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            None => StatusCode::OK,
        };
        (status, Json(self)).into_response()
    }
}

/// Shorthand for the common success case.
pub fn ok<T: Serialize>(
    message: impl Into<String>,
    data: T,
    request_id: impl Into<String>,
) -> Response {
    ApiResponse::ok(message, data, request_id).into_response()
}

/// Shorthand for the common failure case.
pub fn fail(err: &AppError, request_id: impl Into<String>) -> Response {
    ApiResponse::<()>::error(err, request_id).into_response()
}
