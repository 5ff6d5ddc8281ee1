//! Data-store configuration: relational database and message-log database.

use serde::Deserialize;

use super::error::ValidationError;

/// Relational store (rooms, members, users).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string.
    pub url: String,

    /// Connection pool ceiling.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_postgres_url(&self.url)?;
        if self.max_connections > 100 {
            return Err(ValidationError::PoolSizeTooLarge);
        }
        Ok(())
    }
}

/// Message-log store (messages, DLQ documents).
///
/// A separate database behind the same driver; the split keeps the append
/// log's write load off the relational pool.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageStoreConfig {
    /// PostgreSQL connection string for the log database.
    pub url: String,

    /// Connection pool ceiling.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl MessageStoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_postgres_url(&self.url)?;
        if self.max_connections > 100 {
            return Err(ValidationError::PoolSizeTooLarge);
        }
        Ok(())
    }
}

fn validate_postgres_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(())
    } else {
        Err(ValidationError::InvalidDatabaseUrl)
    }
}

fn default_max_connections() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_postgres_schemes() {
        for url in ["postgres://u@h/db", "postgresql://u@h/db"] {
            let config = DatabaseConfig {
                url: url.to_string(),
                max_connections: 10,
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn rejects_foreign_scheme() {
        let config = MessageStoreConfig {
            url: "mysql://u@h/db".to_string(),
            max_connections: 10,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_pool() {
        let config = DatabaseConfig {
            url: "postgres://u@h/db".to_string(),
            max_connections: 500,
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::PoolSizeTooLarge)
        ));
    }
}
