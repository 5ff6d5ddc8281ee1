//! Foundation value objects shared across the domain.

mod errors;
mod ids;
mod timestamp;

pub use errors::{AppError, ErrorCode};
pub use ids::{ClientId, JobId, MessageId, RoomId, UserId};
pub use timestamp::Timestamp;
