//! Device-fingerprint extraction.
//!
//! The `X-Device-Fingerprint` header is an opaque client identifier used to
//! bind refresh sessions to a device. This middleware only lifts it into
//! request extensions; enforcement happens downstream, where the auth
//! middleware rejects every bearer-protected request without one and OTP
//! verification requires it explicitly.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

const HEADER: &str = "X-Device-Fingerprint";

/// Opaque device identifier from the request headers.
#[derive(Debug, Clone)]
pub struct Fingerprint(pub String);

/// Copy the fingerprint header into request extensions.
pub async fn fingerprint_middleware(mut request: Request, next: Next) -> Response {
    if let Some(fp) = request
        .headers()
        .get(HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
    {
        let fp = Fingerprint(fp.to_string());
        request.extensions_mut().insert(fp);
    }

    next.run(request).await
}
