//! Type-state SMTP session.

use super::{ServerInfo, SmtpStream, TlsPolicy};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::types::{Address, Extension, Reply, ReplyCode, is_last_line};
use base64::Engine;
use std::marker::PhantomData;
use tracing::debug;

/// Greeting received, EHLO not yet sent.
#[derive(Debug)]
pub struct Greeted;

/// EHLO done; ready for STARTTLS, AUTH or a new envelope.
#[derive(Debug)]
pub struct Ready;

/// `MAIL FROM` accepted, no recipients yet.
#[derive(Debug)]
pub struct Envelope;

/// At least one recipient accepted.
#[derive(Debug)]
pub struct Recipients;

/// An SMTP session in state `S`.
#[derive(Debug)]
pub struct Session<S> {
    stream: SmtpStream,
    server_info: ServerInfo,
    _state: PhantomData<S>,
}

impl<S> Session<S> {
    /// Returns what the relay told us about itself.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn into_state<T>(self) -> Session<T> {
        Session {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        }
    }

    async fn command(&mut self, cmd: &Command) -> Result<Reply> {
        debug!(verb = cmd.verb(), "smtp >");
        self.stream.write_all(&cmd.serialize()).await?;
        let reply = read_reply(&mut self.stream).await?;
        debug!(code = %reply.code, "smtp <");
        Ok(reply)
    }

    /// Sends QUIT and closes the session (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the relay answers with anything but 221.
    pub async fn quit(mut self) -> Result<()> {
        self.command(&Command::Quit)
            .await?
            .ensure(|code| code == ReplyCode::CLOSING)?;
        Ok(())
    }
}

impl Session<Greeted> {
    /// Reads the relay's greeting from a freshly connected stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting cannot be read or is not 220.
    pub async fn greet(mut stream: SmtpStream) -> Result<Self> {
        let greeting = read_reply(&mut stream)
            .await?
            .ensure(|code| code == ReplyCode::SERVICE_READY)?;

        let hostname = greeting
            .lines
            .first()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                ..ServerInfo::default()
            },
            _state: PhantomData,
        })
    }

    /// Sends EHLO and records the advertised extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay rejects EHLO.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Session<Ready>> {
        let reply = self
            .command(&Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?
            .ensure(ReplyCode::is_success)?;
        self.server_info.learn(&reply.lines);
        Ok(self.into_state())
    }
}

impl Session<Ready> {
    /// Upgrades to TLS with STARTTLS and repeats EHLO over the encrypted
    /// channel, as RFC 3207 requires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if STARTTLS is not advertised, or an
    /// error if the upgrade or the second EHLO fails.
    pub async fn starttls(
        mut self,
        hostname: &str,
        client_hostname: &str,
        policy: TlsPolicy,
    ) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        self.command(&Command::StartTls)
            .await?
            .ensure(|code| code == ReplyCode::SERVICE_READY)?;
        self.stream = self.stream.upgrade_to_tls(hostname, policy).await?;
        debug!(tls = self.stream.is_tls(), "STARTTLS handshake complete");

        let reply = self
            .command(&Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?
            .ensure(ReplyCode::is_success)?;
        self.server_info.learn(&reply.lines);
        Ok(self)
    }

    /// Authenticates with AUTH PLAIN.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay does not answer 235.
    pub async fn auth_plain(mut self, username: &str, password: &str) -> Result<Self> {
        let credentials = format!("\0{username}\0{password}");
        let initial_response =
            base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());

        self.command(&Command::AuthPlain { initial_response })
            .await?
            .ensure(|code| code == ReplyCode::AUTH_OK)?;
        Ok(self)
    }

    /// Opens an envelope with `MAIL FROM`.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay rejects the sender.
    pub async fn mail_from(mut self, from: Address) -> Result<Session<Envelope>> {
        let eight_bit = self.server_info.supports(&Extension::EightBitMime);
        self.command(&Command::MailFrom { from, eight_bit })
            .await?
            .ensure(ReplyCode::is_success)?;
        Ok(self.into_state())
    }
}

impl Session<Envelope> {
    /// Adds the first recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay rejects the recipient.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Session<Recipients>> {
        self.command(&Command::RcptTo { to })
            .await?
            .ensure(ReplyCode::is_success)?;
        Ok(self.into_state())
    }
}

impl Session<Recipients> {
    /// Adds another recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay rejects the recipient.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.command(&Command::RcptTo { to })
            .await?
            .ensure(ReplyCode::is_success)?;
        Ok(self)
    }

    /// Sends DATA followed by the message and the closing `.` line.
    ///
    /// Line endings are normalised to CRLF and lines starting with `.` are
    /// dot-stuffed. Returns the session, ready for another envelope, and
    /// the relay's final reply (which often carries a queue id).
    ///
    /// # Errors
    ///
    /// Returns an error if DATA is refused, the message exceeds the
    /// advertised size limit, or the relay rejects the content.
    pub async fn data(mut self, message: &[u8]) -> Result<(Session<Ready>, Reply)> {
        let payload = encode_payload(message);
        if let Some(limit) = self.server_info.max_message_size()
            && limit > 0
            && payload.len() > limit
        {
            return Err(Error::smtp_error(
                552,
                format!("message is {} bytes, relay limit is {limit}", payload.len()),
            ));
        }

        self.command(&Command::Data)
            .await?
            .ensure(|code| code == ReplyCode::START_DATA)?;

        self.stream.write_all(&payload).await?;
        let reply = read_reply(&mut self.stream)
            .await?
            .ensure(ReplyCode::is_success)?;
        debug!(code = %reply.code, "smtp < (end of data)");

        Ok((self.into_state(), reply))
    }
}

/// Normalises line endings, dot-stuffs, and appends the terminator.
fn encode_payload(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 16);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    let body = body.strip_suffix(b"\r").unwrap_or(body);

    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b".\r\n");
    out
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        let last = is_last_line(&line);
        lines.push(line);
        if last {
            break;
        }
    }
    Reply::parse(&lines)
}
