//! ESMTP extensions advertised in the EHLO reply.

/// An extension keyword from an EHLO reply line.
///
/// Only the extensions the submission path cares about get their own
/// variant; everything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH - SASL mechanisms, upper-cased
    Auth(Vec<String>),
    /// SIZE - maximum message size in bytes, if given
    Size(Option<usize>),
    /// 8BITMIME - 8-bit body transport
    EightBitMime,
    /// SMTPUTF8 - UTF-8 addresses and headers
    SmtpUtf8,
    /// Anything else
    Other(String),
}

impl Extension {
    /// Parses one EHLO reply line (without the reply code).
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            return Self::Other(line.to_string());
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(parts.map(str::to_ascii_uppercase).collect()),
            "SIZE" => Self::Size(parts.next().and_then(|s| s.parse().ok())),
            "8BITMIME" => Self::EightBitMime,
            "SMTPUTF8" => Self::SmtpUtf8,
            _ => Self::Other(line.to_string()),
        }
    }
}
