//! SMTP connection management with type-state sessions.

mod client;
mod stream;

pub use client::{Envelope, Greeted, Ready, Recipients, Session};
pub use stream::{SmtpStream, connect, connect_tls};

use crate::types::Extension;
use std::collections::HashSet;

/// How the TLS layer treats the relay's certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    /// Verify the chain against the webpki root store.
    #[default]
    Verify,
    /// Accept any certificate. Only meant for local bridges on loopback.
    AcceptInvalidCerts,
}

/// Relay capabilities learned from the greeting and EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Relay hostname from the greeting.
    pub hostname: String,
    /// Advertised extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the relay advertises an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is advertised.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the advertised size limit, if any.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Checks if the relay lists `mechanism` under AUTH.
    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.extensions.iter().any(|ext| match ext {
            Extension::Auth(mechanisms) => mechanisms
                .iter()
                .any(|m| m.eq_ignore_ascii_case(mechanism)),
            _ => false,
        })
    }

    fn learn(&mut self, ehlo_lines: &[String]) {
        // First line is the relay's greeting, not an extension.
        self.extensions = ehlo_lines.iter().skip(1).map(|l| Extension::parse(l)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learns_extensions_from_ehlo() {
        let mut info = ServerInfo::default();
        info.learn(&[
            "bridge.local".to_string(),
            "AUTH PLAIN LOGIN".to_string(),
            "SIZE 1000".to_string(),
            "STARTTLS".to_string(),
        ]);
        assert!(info.supports_starttls());
        assert!(info.supports_auth("plain"));
        assert!(!info.supports_auth("XOAUTH2"));
        assert_eq!(info.max_message_size(), Some(1000));
    }
}
