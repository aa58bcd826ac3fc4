//! Email notification of new submissions.
//!
//! [`NotificationSender`] turns a record into an HTML message and hands it
//! to a [`MailTransport`]. The production transport is [`SmtpTransport`];
//! tests substitute their own.

mod render;
mod smtp;

use std::fmt::Write;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use memoryhole_smtp::Address;
use rand::Rng;
use tracing::info;

pub use render::{escape_html, render_table, render_value, title_case};
pub use smtp::SmtpTransport;

use crate::record::SubmissionRecord;

/// Subject of every notification.
pub const SUBJECT: &str = "New Arrestee Intake";

/// Display name shown in the `From` header.
pub const SENDER_NAME: &str = "MemoryHole Legal DB";

/// Email delivery failures. None are retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailError {
    /// The relay could not be reached or the session broke down.
    #[error("mail relay unreachable: {0}")]
    Connection(String),

    /// The relay refused our credentials.
    #[error("mail relay authentication failed: {0}")]
    Authentication(String),

    /// The relay refused the sender, a recipient or the message.
    #[error("mail rejected by relay: {0}")]
    Rejected(String),

    /// A configured address is unusable.
    #[error("invalid mail address: {0}")]
    InvalidAddress(String),
}

/// A fully built notification, ready for the wire.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Envelope and header sender.
    pub from: Address,
    /// Envelope and header recipients.
    pub to: Vec<Address>,
    /// `Message-ID` header value, angle brackets included.
    pub message_id: String,
    /// `Date` header value.
    pub date: DateTime<Utc>,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html: String,
}

impl OutgoingMessage {
    /// Builds the RFC 5322 message. The body is base64 so that long table
    /// rows never exceed SMTP line limits.
    #[must_use]
    pub fn to_rfc5322(&self) -> String {
        let to = self
            .to
            .iter()
            .map(Address::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        let mut message = String::new();
        let _ = write!(message, "From: \"{SENDER_NAME}\" <{}>\r\n", self.from);
        let _ = write!(message, "To: {to}\r\n");
        let _ = write!(message, "Subject: {}\r\n", self.subject);
        let _ = write!(message, "Date: {}\r\n", self.date.to_rfc2822());
        let _ = write!(message, "Message-ID: {}\r\n", self.message_id);
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/html; charset=utf-8\r\n");
        message.push_str("Content-Transfer-Encoding: base64\r\n");
        message.push_str("\r\n");

        let encoded = base64::engine::general_purpose::STANDARD.encode(self.html.as_bytes());
        for (i, c) in encoded.chars().enumerate() {
            if i > 0 && i % 76 == 0 {
                message.push_str("\r\n");
            }
            message.push(c);
        }
        message.push_str("\r\n");
        message
    }
}

/// Delivers a built message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Makes one delivery attempt.
    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), MailError>;
}

/// Emails each submission to a fixed distribution list.
#[derive(Clone)]
pub struct NotificationSender {
    transport: Arc<dyn MailTransport>,
    from: Address,
    recipients: Vec<Address>,
}

impl std::fmt::Debug for NotificationSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSender")
            .field("from", &self.from)
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}

impl NotificationSender {
    /// Creates a sender from `from` to every address in `recipients`.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::InvalidAddress`] if an address is malformed or
    /// the recipient list is empty.
    pub fn new<S: AsRef<str>>(
        transport: Arc<dyn MailTransport>,
        from: &str,
        recipients: &[S],
    ) -> Result<Self, MailError> {
        let address = |s: &str| Address::new(s).map_err(|e| MailError::InvalidAddress(e.to_string()));

        let recipients = recipients
            .iter()
            .map(|r| address(r.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if recipients.is_empty() {
            return Err(MailError::InvalidAddress("no recipients configured".into()));
        }

        Ok(Self {
            transport,
            from: address(from)?,
            recipients,
        })
    }

    /// Builds the notification for `record` without sending it.
    #[must_use]
    pub fn compose(&self, record: &SubmissionRecord) -> OutgoingMessage {
        let date = Utc::now();
        OutgoingMessage {
            from: self.from.clone(),
            to: self.recipients.clone(),
            message_id: message_id(date, self.from.domain()),
            date,
            subject: SUBJECT.to_string(),
            html: render_table(record),
        }
    }

    /// Sends one email for `record` and returns its `Message-ID`.
    ///
    /// # Errors
    ///
    /// Returns a [`MailError`] if the single delivery attempt fails.
    pub async fn send(&self, record: &SubmissionRecord) -> Result<String, MailError> {
        let message = self.compose(record);
        self.transport.deliver(&message).await?;
        info!(
            message_id = %message.message_id,
            recipients = message.to.len(),
            "notification sent"
        );
        Ok(message.message_id)
    }
}

fn message_id(date: DateTime<Utc>, domain: &str) -> String {
    let nonce: u64 = rand::thread_rng().r#gen();
    format!("<{}.{nonce:016x}@{domain}>", date.timestamp_micros())
}
