//! JWT key configuration.
//!
//! The token layer signs with RS256; the key pair is loaded from PEM files
//! once at startup.

use serde::Deserialize;

use super::error::{ConfigError, ValidationError};

/// Locations of the RSA key pair.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Path to the RSA private key PEM (signing).
    pub private_key_path: String,

    /// Path to the RSA public key PEM (verification).
    pub public_key_path: String,
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.private_key_path.is_empty() || self.public_key_path.is_empty() {
            return Err(ValidationError::EmptyKeyPath);
        }
        Ok(())
    }

    /// Read both PEM files.
    pub fn read_key_pair(&self) -> Result<(Vec<u8>, Vec<u8>), ConfigError> {
        let private = std::fs::read(&self.private_key_path)
            .map_err(|e| ConfigError::KeyFile(format!("{}: {}", self.private_key_path, e)))?;
        let public = std::fs::read(&self.public_key_path)
            .map_err(|e| ConfigError::KeyFile(format!("{}: {}", self.public_key_path, e)))?;
        Ok((private, public))
    }
}
