//! RS256 token issuance and verification.
//!
//! Access tokens live one hour; refresh tokens live seven days and carry a
//! `jti` that binds them to a server-side session record.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::foundation::{AppError, ErrorCode, Timestamp, UserId};
use crate::domain::refresh_session::REFRESH_TTL_SECS;

/// Access-token lifetime in seconds.
pub const ACCESS_TTL_SECS: i64 = 3600;

/// JWT claims carried by both token kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> UserId {
        UserId::new(self.sub.clone())
    }
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub jti: String,
}

/// Signs and verifies with the RSA pair loaded at startup.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenService {
    /// Build from PEM-encoded RSA keys.
    pub fn from_rsa_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, AppError> {
        let encoding = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| AppError::new(ErrorCode::Internal, format!("private key: {}", e)))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| AppError::new(ErrorCode::Internal, format!("public key: {}", e)))?;
        Ok(Self { encoding, decoding })
    }

    /// Issue a new access/refresh pair for a user.
    pub fn issue(&self, user_id: &UserId, username: &str) -> Result<TokenPair, AppError> {
        let now = Timestamp::now().as_unix_secs();
        let jti = Uuid::new_v4().to_string();

        let access_claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            jti: None,
            iat: now,
            exp: now + ACCESS_TTL_SECS,
        };
        let refresh_claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            jti: Some(jti.clone()),
            iat: now,
            exp: now + REFRESH_TTL_SECS,
        };

        let header = Header::new(Algorithm::RS256);
        let access = encode(&header, &access_claims, &self.encoding)
            .map_err(|e| AppError::new(ErrorCode::Internal, format!("sign access: {}", e)))?;
        let refresh = encode(&header, &refresh_claims, &self.encoding)
            .map_err(|e| AppError::new(ErrorCode::Internal, format!("sign refresh: {}", e)))?;

        Ok(TokenPair {
            access,
            refresh,
            jti,
        })
    }

    /// Verify a token's signature and expiry.
    ///
    /// # Errors
    ///
    /// - `TokenExpired` for an otherwise valid but expired token, so the
    ///   middleware can attempt the refresh path
    /// - `Unauthenticated` for anything else
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.required_spec_claims.clear();

        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AppError::new(
                    ErrorCode::TokenExpired,
                    "token expired",
                )),
                _ => Err(AppError::new(
                    ErrorCode::Unauthenticated,
                    "invalid token",
                )),
            },
        }
    }
}

#[cfg(test)]
impl TokenService {
    /// Placeholder signer for unit tests that never reach the token path.
    /// The key does not match the RS256 header, so any accidental use fails
    /// loudly.
    pub fn unusable_for_tests() -> Self {
        Self {
            encoding: EncodingKey::from_secret(b"test-only"),
            decoding: DecodingKey::from_secret(b"test-only"),
        }
    }
}
