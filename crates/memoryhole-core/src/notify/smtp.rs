//! SMTP delivery through the configured relay.

use async_trait::async_trait;
use memoryhole_smtp::connection::{connect, connect_tls};
use memoryhole_smtp::{Error as SmtpError, Session, TlsPolicy};
use tracing::debug;

use super::{MailError, MailTransport, OutgoingMessage};
use crate::config::{Security, SmtpConfig};

/// Name we introduce ourselves with in EHLO.
const CLIENT_HOSTNAME: &str = "localhost";

/// One SMTP session per message against the configured relay.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    /// Creates a transport for `config`. Nothing is contacted until the
    /// first delivery.
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    const fn tls_policy(&self) -> TlsPolicy {
        if self.config.accept_invalid_certs {
            TlsPolicy::AcceptInvalidCerts
        } else {
            TlsPolicy::Verify
        }
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), MailError> {
        let Some((first, rest)) = message.to.split_first() else {
            return Err(MailError::InvalidAddress("no recipients".into()));
        };
        let cfg = &self.config;
        let policy = self.tls_policy();

        let stream = match cfg.security {
            Security::Tls => connect_tls(&cfg.host, cfg.port, policy).await,
            Security::StartTls | Security::None => connect(&cfg.host, cfg.port).await,
        }
        .map_err(connection)?;
        debug!(host = %cfg.host, port = cfg.port, security = ?cfg.security, "connected to relay");

        let session = Session::greet(stream)
            .await
            .map_err(connection)?
            .ehlo(CLIENT_HOSTNAME)
            .await
            .map_err(connection)?;

        let session = if cfg.security == Security::StartTls {
            session
                .starttls(&cfg.host, CLIENT_HOSTNAME, policy)
                .await
                .map_err(connection)?
        } else {
            session
        };

        let session = match &cfg.username {
            Some(_) if !session.server_info().supports_auth("PLAIN") => {
                return Err(MailError::Authentication(
                    "relay does not offer AUTH PLAIN".into(),
                ));
            }
            Some(username) => session
                .auth_plain(username, cfg.password.as_deref().unwrap_or_default())
                .await
                .map_err(authentication)?,
            None => session,
        };

        let mut session = session
            .mail_from(message.from.clone())
            .await
            .map_err(rejected)?
            .rcpt_to(first.clone())
            .await
            .map_err(rejected)?;
        for recipient in rest {
            session = session.rcpt_to(recipient.clone()).await.map_err(rejected)?;
        }

        let (session, reply) = session
            .data(message.to_rfc5322().as_bytes())
            .await
            .map_err(rejected)?;
        debug!(reply = %reply.text(), "relay accepted message");

        // The message is queued; a failed QUIT changes nothing.
        if let Err(e) = session.quit().await {
            debug!(error = %e, "QUIT failed after delivery");
        }
        Ok(())
    }
}

fn connection(err: SmtpError) -> MailError {
    MailError::Connection(err.to_string())
}

fn authentication(err: SmtpError) -> MailError {
    match err {
        SmtpError::SmtpError { .. } => MailError::Authentication(err.to_string()),
        other => connection(other),
    }
}

fn rejected(err: SmtpError) -> MailError {
    if let SmtpError::SmtpError { code, .. } = &err {
        debug!(code, transient = err.is_transient(), "relay refused envelope or message");
    }
    match err {
        SmtpError::SmtpError { .. } => MailError::Rejected(err.to_string()),
        SmtpError::InvalidAddress(reason) => MailError::InvalidAddress(reason),
        other => connection(other),
    }
}
