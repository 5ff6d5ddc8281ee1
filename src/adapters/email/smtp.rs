//! SMTP implementation of the Mailer port.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::domain::foundation::{AppError, ErrorCode};
use crate::ports::{Mailer, OutboundMail};

/// Async SMTP transport for outbound mail.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    /// Build the transport from configuration. STARTTLS against the
    /// configured host/port; credentials only when both are present.
    pub fn new(config: &EmailConfig) -> Result<Self, AppError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| AppError::new(ErrorCode::Mail, format!("smtp relay: {}", e)))?
            .port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutboundMail) -> Result<(), AppError> {
        let message = Message::builder()
            .from(self
                .from
                .parse()
                .map_err(|e| AppError::new(ErrorCode::Mail, format!("from address: {}", e)))?)
            .to(mail
                .to
                .parse()
                .map_err(|e| AppError::new(ErrorCode::Mail, format!("to address: {}", e)))?)
            .subject(mail.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body)
            .map_err(|e| AppError::new(ErrorCode::Mail, format!("build mail: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::new(ErrorCode::Mail, format!("smtp send: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_recipient_address_fails_to_build() {
        let err: Result<lettre::Address, _> = "not-an-email".parse();
        assert!(err.is_err());
    }
}
