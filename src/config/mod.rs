//! Application configuration.
//!
//! Type-safe configuration loading via the `config` and `dotenvy` crates.
//! Values are read from the environment under the `PARLEY` prefix with `__`
//! separating nested sections:
//!
//! - `PARLEY__SERVER__LISTEN_ADDR=0.0.0.0:8080` -> `server.listen_addr`
//! - `PARLEY__DATABASE__URL=...` -> `database.url`

mod auth;
mod database;
mod email;
mod error;
mod redis;
mod server;

pub use auth::AuthConfig;
pub use database::{DatabaseConfig, MessageStoreConfig};
pub use email::EmailConfig;
pub use error::{ConfigError, ValidationError};
pub use redis::RedisConfig;
pub use server::ServerConfig;

use serde::Deserialize;

/// Root application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (app name, listen address, timeouts).
    #[serde(default)]
    pub server: ServerConfig,

    /// Relational store (rooms, members, users).
    pub database: DatabaseConfig,

    /// Message-log store (messages, DLQ documents).
    pub message_store: MessageStoreConfig,

    /// Key-value store (cache, queue, refresh sessions).
    pub redis: RedisConfig,

    /// SMTP parameters for OTP mail.
    pub email: EmailConfig,

    /// JWT key-file locations.
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from environment variables (and `.env` when
    /// present, for development).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default().prefix("PARLEY").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.message_store.validate()?;
        self.redis.validate()?;
        self.email.validate()?;
        self.auth.validate()?;
        Ok(())
    }
}
