//! User store port.

use async_trait::async_trait;

use crate::domain::foundation::{AppError, UserId};
use crate::domain::user::{User, UserFilter};

/// Relational store for accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new account.
    ///
    /// # Errors
    ///
    /// - `DuplicateUser` on username or email collision
    async fn insert(&self, user: &User) -> Result<(), AppError>;

    /// Fetch by id.
    ///
    /// # Errors
    ///
    /// - `UserNotFound` if absent
    async fn find_by_id(&self, id: &UserId) -> Result<User, AppError>;

    /// Fetch by filter; `None` when nothing matches.
    async fn find_one(&self, filter: &UserFilter) -> Result<Option<User>, AppError>;

    /// Flip the active flag after OTP verification.
    async fn activate(&self, id: &UserId) -> Result<(), AppError>;
}
