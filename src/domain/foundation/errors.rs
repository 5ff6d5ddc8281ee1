//! Application error type shared by all layers.
//!
//! Every fallible operation that crosses a layer boundary returns
//! [`AppError`]: a machine-readable [`ErrorCode`], a human-readable message,
//! and an optional offending field. The HTTP layer translates the code into
//! a status and wraps the rest in the response envelope.

use std::fmt;

/// Error codes organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Validation
    Validation,
    InvalidPayload,

    // Credentials
    Unauthenticated,
    TokenExpired,
    SessionRevoked,

    // Authorization
    Forbidden,
    NotRoomMember,
    EditWindowExpired,

    // Missing resources
    RoomNotFound,
    MessageNotFound,
    UserNotFound,
    SessionNotFound,

    // Conflicts
    ConcurrentUpdate,
    DuplicateRoom,
    DuplicateUser,

    // Pressure
    RateLimited,
    AtCapacity,

    // Downstream
    Database,
    Cache,
    Queue,
    Mail,
    Internal,
}

impl ErrorCode {
    /// HTTP status this code maps to.
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::Validation | ErrorCode::InvalidPayload => 400,
            ErrorCode::Unauthenticated | ErrorCode::TokenExpired | ErrorCode::SessionRevoked => 401,
            ErrorCode::Forbidden | ErrorCode::NotRoomMember | ErrorCode::EditWindowExpired => 403,
            ErrorCode::RoomNotFound
            | ErrorCode::MessageNotFound
            | ErrorCode::UserNotFound
            | ErrorCode::SessionNotFound => 404,
            ErrorCode::ConcurrentUpdate | ErrorCode::DuplicateRoom | ErrorCode::DuplicateUser => {
                409
            }
            ErrorCode::RateLimited => 429,
            ErrorCode::AtCapacity => 503,
            ErrorCode::Database
            | ErrorCode::Cache
            | ErrorCode::Queue
            | ErrorCode::Mail
            | ErrorCode::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::SessionRevoked => "SESSION_REVOKED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotRoomMember => "NOT_ROOM_MEMBER",
            ErrorCode::EditWindowExpired => "EDIT_WINDOW_EXPIRED",
            ErrorCode::RoomNotFound => "ROOM_NOT_FOUND",
            ErrorCode::MessageNotFound => "MESSAGE_NOT_FOUND",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::ConcurrentUpdate => "CONCURRENT_UPDATE",
            ErrorCode::DuplicateRoom => "DUPLICATE_ROOM",
            ErrorCode::DuplicateUser => "DUPLICATE_USER",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::AtCapacity => "AT_CAPACITY",
            ErrorCode::Database => "DATABASE_ERROR",
            ErrorCode::Cache => "CACHE_ERROR",
            ErrorCode::Queue => "QUEUE_ERROR",
            ErrorCode::Mail => "MAIL_ERROR",
            ErrorCode::Internal => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Standard application error with code, message, and optional field.
#[derive(Debug, Clone)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub field: Option<String>,
}

impl AppError {
    /// Creates a new error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    /// Creates a validation error pinned to a specific field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Validation,
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Attaches a field name to the error.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Creates a database error from any displayable cause.
    pub fn database(cause: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Database, format!("database error: {}", cause))
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        self.code.status()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} [{}]: {}", self.code, field, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_expected_statuses() {
        assert_eq!(ErrorCode::Validation.status(), 400);
        assert_eq!(ErrorCode::TokenExpired.status(), 401);
        assert_eq!(ErrorCode::EditWindowExpired.status(), 403);
        assert_eq!(ErrorCode::MessageNotFound.status(), 404);
        assert_eq!(ErrorCode::ConcurrentUpdate.status(), 409);
        assert_eq!(ErrorCode::RateLimited.status(), 429);
        assert_eq!(ErrorCode::AtCapacity.status(), 503);
        assert_eq!(ErrorCode::Database.status(), 500);
    }

    #[test]
    fn validation_error_carries_field() {
        let err = AppError::validation("content", "cannot be empty");
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.field.as_deref(), Some("content"));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn display_includes_field_when_present() {
        let err = AppError::new(ErrorCode::RoomNotFound, "no such room").with_field("room_id");
        assert_eq!(err.to_string(), "ROOM_NOT_FOUND [room_id]: no such room");
    }
}
