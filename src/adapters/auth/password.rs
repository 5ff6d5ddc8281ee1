//! Argon2id password hashing and verification.
//!
//! Hashes use the PHC string format, so algorithm parameters and salt travel
//! with the hash itself.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::domain::foundation::{AppError, ErrorCode};

/// Hash a plaintext password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::new(ErrorCode::Internal, format!("password hash: {}", e)))?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored PHC hash.
///
/// Returns `Ok(false)` on mismatch; only malformed hashes are errors.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::new(ErrorCode::Internal, format!("bad password hash: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AppError::new(
            ErrorCode::Internal,
            format!("password verify: {}", e),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("hunter2!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter2!", &hash).unwrap());
        assert!(!verify_password("hunter3!", &hash).unwrap());
    }

    #[test]
    fn same_password_hashes_differently() {
        let a = hash_password("hunter2!").unwrap();
        let b = hash_password("hunter2!").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("pw", "not-a-phc-string").is_err());
    }
}
