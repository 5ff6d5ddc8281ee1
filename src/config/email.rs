//! SMTP configuration for outbound mail.

use serde::Deserialize;

use super::error::ValidationError;

/// SMTP parameters for the OTP mailer.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,

    /// SMTP server port (defaults to 587, STARTTLS).
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Optional SMTP username.
    pub username: Option<String>,

    /// Optional SMTP password.
    pub password: Option<String>,

    /// RFC 5322 "From" address.
    pub from: String,
}

impl EmailConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.smtp_host.is_empty() {
            return Err(ValidationError::MissingRequired("email.smtp_host"));
        }
        if self.smtp_port == 0 {
            return Err(ValidationError::InvalidSmtpPort);
        }
        if !self.from.contains('@') {
            return Err(ValidationError::InvalidFromEmail);
        }
        Ok(())
    }
}

fn default_smtp_port() -> u16 {
    587
}
