//! HTTP middleware: request ids, device fingerprints, token auth.

mod auth;
mod fingerprint;
mod request_id;

pub use auth::{auth_middleware, AuthState, AuthUser};
pub use fingerprint::{fingerprint_middleware, Fingerprint};
pub use request_id::{request_id_middleware, RequestId};
