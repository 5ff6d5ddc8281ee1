//! Server configuration.

use serde::Deserialize;
use std::net::SocketAddr;

use super::error::ValidationError;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Application name, used in log fields and mail subjects.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Address to bind to, `host:port`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// HTTP read/write timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Grace period for in-flight work on shutdown, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Origins allowed to open websocket connections (comma-separated).
    /// Local origins are always admitted.
    pub allowed_origins: Option<String>,
}

impl ServerConfig {
    /// Parsed socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ValidationError> {
        self.listen_addr
            .parse()
            .map_err(|_| ValidationError::InvalidListenAddr)
    }

    /// Allowed origins as a vector.
    pub fn allowed_origins_list(&self) -> Vec<String> {
        self.allowed_origins
            .as_ref()
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    }

    /// Validate server configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.socket_addr()?;
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 300 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            allowed_origins: None,
        }
    }
}

fn default_app_name() -> String {
    "parley".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_shutdown_grace() -> u64 {
    10
}
