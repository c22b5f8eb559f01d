//! Delivery Client - Sends one step email through the campaign's SMTP server

use async_trait::async_trait;
use dripmail_common::types::SmtpSettings;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Failed to create SMTP transport: {0}")]
    Transport(String),

    #[error("SMTP connection check failed: {0}")]
    Verify(String),

    #[error("SMTP send failed: {0}")]
    Send(String),
}

/// A rendered email ready to hand to the mailer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Sends a single email with caller-supplied SMTP settings
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, smtp: &SmtpSettings, email: &OutgoingEmail) -> Result<(), DeliveryError>;
}

/// lettre-backed mailer.
///
/// Builds a fresh transport per send. Without connection pooling the SMTP
/// session is closed once the send returns, whether it succeeded or not.
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    /// Create a new SMTP mailer
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_message(email: &OutgoingEmail) -> Result<Message, DeliveryError> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::InvalidAddress {
                address: email.from.clone(),
                reason: e.to_string(),
            })?;

        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::InvalidAddress {
                address: email.to.clone(),
                reason: e.to_string(),
            })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| DeliveryError::Build(e.to_string()))
    }

    fn build_transport(
        &self,
        smtp: &SmtpSettings,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let mut builder = if smtp.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
                .map_err(|e| DeliveryError::Transport(e.to_string()))?
        } else {
            let tls = TlsParameters::new(smtp.host.clone())
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
                .tls(Tls::Opportunistic(tls))
        };

        builder = builder.port(smtp.port).timeout(Some(self.timeout));

        if let Some((user, password)) = smtp.credentials() {
            builder = builder.credentials(Credentials::new(user.to_string(), password.to_string()));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, smtp: &SmtpSettings, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let message = Self::build_message(email)?;
        let transport = self.build_transport(smtp)?;

        match transport.test_connection().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(DeliveryError::Verify(format!(
                    "{}:{} did not accept the connection",
                    smtp.host, smtp.port
                )))
            }
            Err(e) => return Err(DeliveryError::Verify(e.to_string())),
        }

        let response = transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Send(e.to_string()))?;

        debug!(
            to = %email.to,
            code = %response.code(),
            "SMTP server accepted message"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(from: &str, to: &str) -> OutgoingEmail {
        OutgoingEmail {
            from: from.to_string(),
            to: to.to_string(),
            subject: "Welcome".to_string(),
            html_body: "<p>Hello</p>".to_string(),
        }
    }

    fn smtp(port: u16) -> SmtpSettings {
        SmtpSettings {
            host: "localhost".to_string(),
            port,
            user: None,
            password: None,
            secure: false,
        }
    }

    #[test]
    fn test_build_message() {
        let message = SmtpMailer::build_message(&email("team@example.com", "ana@example.com"));
        assert!(message.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_rejected_before_connecting() {
        let mailer = SmtpMailer::new(Duration::from_secs(1));
        let err = mailer
            .send(&smtp(2525), &email("team@example.com", "not an address"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_verification() {
        // Nothing listens on port 1
        let mailer = SmtpMailer::new(Duration::from_secs(1));
        let err = mailer
            .send(&smtp(1), &email("team@example.com", "ana@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Verify(_)));
    }
}
