//! User account entity.

use serde::{Deserialize, Serialize};

use super::foundation::{Timestamp, UserId};

/// A registered account.
///
/// Accounts start inactive and are activated by OTP verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    /// Creates a new, inactive account.
    pub fn register(
        id: UserId,
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            is_active: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Optional filters for user lookup.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub username: Option<String>,
    pub email: Option<String>,
}
