//! Envelope address type.

use crate::error::{Error, Result};

/// Address used in `MAIL FROM` / `RCPT TO`.
///
/// Only the bare `local@domain` form is accepted; display names belong in
/// the message headers, not the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new envelope address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address is empty, does not
    /// have exactly one `@`, has an empty local or domain part, or contains
    /// whitespace or angle brackets.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let trimmed = addr.trim();

        if trimmed.is_empty() {
            return Err(Error::InvalidAddress("address cannot be empty".into()));
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!(
                "{trimmed}: whitespace and angle brackets are not allowed"
            )));
        }

        match trimmed.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(Self(trimmed.to_string()))
            }
            _ => Err(Error::InvalidAddress(format!(
                "{trimmed}: expected local@domain"
            ))),
        }
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the domain part of the address.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, domain)| domain)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_address() {
        let addr = Address::new("legal@example.org").unwrap();
        assert_eq!(addr.as_str(), "legal@example.org");
        assert_eq!(addr.domain(), "example.org");
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let addr = Address::new("  legal@example.org ").unwrap();
        assert_eq!(addr.as_str(), "legal@example.org");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["", "legal.example.org", "@example.org", "legal@", "a@b@c", "a b@c.d", "<a@b.c>"] {
            assert!(Address::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
