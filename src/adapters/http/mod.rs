//! HTTP adapters - REST API surface.

pub mod chat;
pub mod hub;
pub mod middleware;
pub mod response;
pub mod user;

pub use response::{ApiResponse, ErrorBody};
