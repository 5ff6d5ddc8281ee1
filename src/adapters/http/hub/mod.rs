//! Hub introspection and admin endpoints.

pub mod handlers;
pub mod routes;

pub use handlers::HubAppState;
pub use routes::hub_routes;
