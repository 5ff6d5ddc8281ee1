//! Chat endpoints.

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::ChatAppState;
pub use routes::chat_routes;
