//! Bearer-token authentication with transparent refresh.
//!
//! Every bearer-protected request must carry the `X-Device-Fingerprint`
//! header; its absence is rejected before the Authorization header is even
//! read. A valid access token then passes straight through. An expired one
//! triggers the refresh path: the `refresh_token` cookie is verified, its
//! session record (keyed by user, device fingerprint, and `jti`) must be
//! valid and unexpired, a new pair is issued, the old session is revoked,
//! and the response carries the new refresh cookie plus the new access
//! token in `X-New-Access-Token`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::adapters::auth::TokenService;
use crate::adapters::http::response::fail;
use crate::domain::foundation::{AppError, ErrorCode, Timestamp, UserId};
use crate::domain::refresh_session::{RefreshSession, REFRESH_TTL_SECS};
use crate::ports::RefreshSessionStore;

use super::fingerprint::Fingerprint;
use super::request_id::RequestId;

const NEW_ACCESS_HEADER: &str = "X-New-Access-Token";
const REFRESH_COOKIE: &str = "refresh_token";

/// State for the auth middleware.
#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenService>,
    pub sessions: Arc<dyn RefreshSessionStore>,
}

/// The authenticated caller, injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_else(|| "unknown".to_string());

        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            fail(
                &AppError::new(ErrorCode::Unauthenticated, "authentication required"),
                request_id,
            )
        })
    }
}

/// Tokens minted by the refresh path, attached to the outgoing response.
#[derive(Clone)]
struct MintedTokens {
    access: String,
    refresh: String,
}

/// Validate the access token, refreshing it when expired.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    // The device fingerprint is required on every authenticated endpoint,
    // not just the refresh path.
    let Some(fingerprint) = request
        .extensions()
        .get::<Fingerprint>()
        .map(|fp| fp.0.clone())
    else {
        return fail(
            &AppError::new(ErrorCode::Unauthenticated, "missing device fingerprint")
                .with_field("fingerprint"),
            request_id,
        );
    };

    let Some(token) = bearer_token(&request) else {
        return fail(
            &AppError::new(ErrorCode::Unauthenticated, "missing authorization header"),
            request_id,
        );
    };

    let mut minted: Option<MintedTokens> = None;

    let user_id = match state.tokens.verify(&token) {
        Ok(claims) => claims.user_id(),
        Err(err) if err.code == ErrorCode::TokenExpired => {
            match refresh_pair(&state, &request, &fingerprint).await {
                Ok((user_id, tokens)) => {
                    minted = Some(tokens);
                    user_id
                }
                Err(err) => return fail(&err, request_id),
            }
        }
        Err(err) => return fail(&err, request_id),
    };

    request.extensions_mut().insert(AuthUser(user_id));
    let mut response = next.run(request).await;

    if let Some(tokens) = minted {
        if let Ok(value) = HeaderValue::from_str(&tokens.access) {
            response.headers_mut().insert(NEW_ACCESS_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&refresh_cookie(&tokens.refresh)) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }

    response
}

/// The refresh path: cookie → session record → new pair → rotate.
async fn refresh_pair(
    state: &AuthState,
    request: &Request,
    fingerprint: &str,
) -> Result<(UserId, MintedTokens), AppError> {
    let refresh_token = cookie_value(request, REFRESH_COOKIE).ok_or_else(|| {
        AppError::new(ErrorCode::Unauthenticated, "refresh token missing")
    })?;

    let claims = state
        .tokens
        .verify(&refresh_token)
        .map_err(|_| AppError::new(ErrorCode::Unauthenticated, "invalid refresh token"))?;

    let jti = claims
        .jti
        .clone()
        .ok_or_else(|| AppError::new(ErrorCode::Unauthenticated, "refresh token has no session"))?;

    let user_id = claims.user_id();
    let session = state
        .sessions
        .find(&user_id, fingerprint, &jti)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::SessionRevoked, "refresh session not found"))?;

    if !session.is_usable_at(Timestamp::now().as_unix_secs()) {
        return Err(AppError::new(
            ErrorCode::SessionRevoked,
            "refresh token revoked or expired",
        ));
    }

    let pair = state.tokens.issue(&user_id, &claims.username)?;

    // Rotate: the new session becomes valid, the old one is revoked.
    let new_session = RefreshSession::issue(user_id.clone(), pair.jti.clone(), fingerprint);
    state.sessions.put(&new_session).await?;
    state.sessions.revoke(&session).await?;

    tracing::debug!(user_id = %user_id, "access token refreshed");

    Ok((
        user_id,
        MintedTokens {
            access: pair.access,
            refresh: pair.refresh,
        },
    ))
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.to_string())
        })
}

fn cookie_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get("Cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                (key == name).then(|| value.to_string())
            })
        })
}

/// HttpOnly, Secure, SameSite=Strict refresh cookie.
fn refresh_cookie(token: &str) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}",
        REFRESH_COOKIE, token, REFRESH_TTL_SECS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use crate::adapters::http::middleware::fingerprint_middleware;
    use crate::domain::refresh_session::RefreshSession;

    fn request_with_headers(pairs: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/");
        for (name, value) in pairs {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    struct NoSessions;

    #[async_trait::async_trait]
    impl RefreshSessionStore for NoSessions {
        async fn find(
            &self,
            _user_id: &UserId,
            _fingerprint: &str,
            _jti: &str,
        ) -> Result<Option<RefreshSession>, AppError> {
            Ok(None)
        }

        async fn put(&self, _session: &RefreshSession) -> Result<(), AppError> {
            Ok(())
        }

        async fn revoke(&self, _session: &RefreshSession) -> Result<(), AppError> {
            Ok(())
        }
    }

    /// Router with the fingerprint extractor outside the auth layer, the
    /// way the server assembles them.
    fn protected_app() -> Router {
        let auth = AuthState {
            tokens: Arc::new(crate::adapters::auth::TokenService::unusable_for_tests()),
            sessions: Arc::new(NoSessions),
        };

        Router::new()
            .route("/protected", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(auth, auth_middleware))
            .layer(axum::middleware::from_fn(fingerprint_middleware))
    }

    async fn error_field(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        json["errors"]["field"].clone()
    }

    #[tokio::test]
    async fn missing_fingerprint_is_rejected_before_token_checks() {
        let response = protected_app()
            .oneshot(request_with_headers(&[("Authorization", "Bearer token")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_field(response).await, "fingerprint");
    }

    #[tokio::test]
    async fn fingerprinted_request_proceeds_to_token_validation() {
        // Garbage token: the rejection must now come from the token check,
        // not the fingerprint one.
        let response = protected_app()
            .oneshot(request_with_headers(&[
                ("Authorization", "Bearer garbage"),
                ("X-Device-Fingerprint", "fp-1"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(error_field(response).await.is_null());
    }

    #[test]
    fn bearer_token_parses_case_insensitively() {
        let request = request_with_headers(&[("Authorization", "bearer abc.def")]);
        assert_eq!(bearer_token(&request), Some("abc.def".to_string()));

        let request = request_with_headers(&[("Authorization", "Basic abc")]);
        assert_eq!(bearer_token(&request), None);
    }

    #[test]
    fn cookie_value_finds_named_cookie() {
        let request =
            request_with_headers(&[("Cookie", "theme=dark; refresh_token=tok; lang=en")]);
        assert_eq!(
            cookie_value(&request, "refresh_token"),
            Some("tok".to_string())
        );
        assert_eq!(cookie_value(&request, "absent"), None);
    }

    #[test]
    fn refresh_cookie_attributes() {
        let cookie = refresh_cookie("tok");
        assert!(cookie.starts_with("refresh_token=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Max-Age=604800"));
    }
}
