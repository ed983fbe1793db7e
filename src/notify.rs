//! Mail notification when a pass finds new replies.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

use crate::config::SmtpConfig;

/// Subject line of notification mails.
pub const SUBJECT: &str = "new topics";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Receiver of "new content" summaries.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an HTML summary.
    async fn notify(&self, subject: &str, html: String) -> Result<(), NotifyError>;
}

/// Sends summaries through an SMTP relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    /// Build a notifier from mail settings.
    ///
    /// Port 465 uses implicit TLS, anything else STARTTLS.
    ///
    /// # Errors
    ///
    /// Returns an error if an address is invalid or the relay cannot be set up.
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let mut builder = builder.port(config.port);

        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        let to: Mailbox = config.to.parse()?;
        let from: Mailbox = match &config.user {
            Some(user) => user.parse()?,
            None => to.clone(),
        };

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, subject: &str, html: String) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)?;

        self.transport.send(message).await?;
        info!(to = %self.to, "Sent notification mail");
        Ok(())
    }
}
