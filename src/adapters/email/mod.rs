//! Mail adapters.

mod smtp;

pub use smtp::SmtpMailer;
