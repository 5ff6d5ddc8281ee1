//! Application layer: use-case services and the composition root.

pub mod chat_service;
pub mod server;
pub mod state;
pub mod user_service;

pub use chat_service::{ChatService, MessageHistory, UpdatedMessage};
pub use state::AppState;
pub use user_service::{TokenBundle, UserService};
