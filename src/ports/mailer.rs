//! Mail dispatch port.

use async_trait::async_trait;

use crate::domain::foundation::AppError;

/// A plain-text outbound mail.
#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message.
    async fn send(&self, mail: OutboundMail) -> Result<(), AppError>;
}
