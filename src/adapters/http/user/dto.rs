//! Wire DTOs for account endpoints.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::UserId;
use crate::domain::user::User;

/// Body of `POST /users`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Body of `POST /users/{userId}` (OTP verification).
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub otp: String,
}

/// Registered-account view; never exposes the password hash.
#[derive(Debug, Serialize)]
pub struct UserDto {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub is_active: bool,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            email: user.email,
            is_active: user.is_active,
        }
    }
}

/// Verification result: the access token travels in the body, the refresh
/// token in the cookie.
#[derive(Debug, Serialize)]
pub struct VerifiedDto {
    pub user_id: UserId,
    pub access_token: String,
}
