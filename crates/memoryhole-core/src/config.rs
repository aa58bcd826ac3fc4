//! Service configuration.
//!
//! Everything is read once at startup from environment-style variables and
//! passed to components explicitly; nothing here is global.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::journal::JournalMode;

/// Default verification endpoint (Google reCAPTCHA v3).
pub const DEFAULT_CAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

/// Default sender identity for notification emails.
pub const DEFAULT_MAIL_FROM: &str = "memoryhole-legal-database@proton.me";

/// Security/encryption mode for the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption. The default relay is a bridge on loopback.
    #[default]
    None,
    /// Implicit TLS (connect directly with TLS).
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "plain" => Some(Self::None),
            "tls" | "ssl" => Some(Self::Tls),
            "starttls" => Some(Self::StartTls),
            _ => None,
        }
    }
}

/// Outbound relay configuration.
#[derive(Clone)]
pub struct SmtpConfig {
    /// Relay hostname.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// AUTH PLAIN username; no AUTH is attempted when unset.
    pub username: Option<String>,
    /// AUTH PLAIN password.
    pub password: Option<String>,
    /// Accept self-signed relay certificates.
    pub accept_invalid_certs: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1025,
            security: Security::None,
            username: None,
            password: None,
            accept_invalid_certs: true,
        }
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// Captcha verification settings.
#[derive(Clone)]
pub struct CaptchaConfig {
    /// Secret shared with the verification service.
    pub secret: String,
    /// Verification endpoint.
    pub verify_url: String,
}

impl std::fmt::Debug for CaptchaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaConfig")
            .field("secret", &"<redacted>")
            .field("verify_url", &self.verify_url)
            .finish()
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// Notification recipients.
    pub recipients: Vec<String>,
    /// Whether submissions are emailed.
    pub enable_email: bool,
    /// Whether submissions are journaled to disk.
    pub enable_file: bool,
    /// Journal directory: holds the shared log, or one file per submission.
    pub data_path: PathBuf,
    /// Journal strategy.
    pub journal_mode: JournalMode,
    /// Captcha settings.
    pub captcha: CaptchaConfig,
    /// Relay settings.
    pub smtp: SmtpConfig,
    /// Sender address.
    pub mail_from: String,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required option is missing or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required option is missing or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let enable_email = flag(&get, "ENABLE_EMAIL", true)?;
        let enable_file = flag(&get, "ENABLE_FILE", false)?;

        let recipients: Vec<String> = get("EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        if enable_email && recipients.is_empty() {
            return Err(ConfigError::Invalid {
                key: "EMAILS",
                reason: "at least one recipient is required when ENABLE_EMAIL is on".into(),
            });
        }

        let journal_mode = match get("JOURNAL_MODE") {
            None => JournalMode::default(),
            Some(v) => JournalMode::parse(&v).ok_or_else(|| ConfigError::Invalid {
                key: "JOURNAL_MODE",
                reason: format!("expected `shared` or `per-submission`, got `{v}`"),
            })?,
        };

        let secret = get("CAPTCHA_SECRET_KEY").ok_or(ConfigError::Missing("CAPTCHA_SECRET_KEY"))?;

        let smtp_defaults = SmtpConfig::default();
        let smtp = SmtpConfig {
            host: get("SMTP_HOST").unwrap_or(smtp_defaults.host),
            port: number(&get, "SMTP_PORT", smtp_defaults.port)?,
            security: match get("SMTP_SECURITY") {
                None => smtp_defaults.security,
                Some(v) => Security::parse(&v).ok_or_else(|| ConfigError::Invalid {
                    key: "SMTP_SECURITY",
                    reason: format!("expected `none`, `starttls` or `tls`, got `{v}`"),
                })?,
            },
            username: get("SMTP_USERNAME").or_else(|| get("PROTONMAIL_LOGIN")),
            password: get("SMTP_PASSWORD").or_else(|| get("PROTONMAIL_PW")),
            accept_invalid_certs: flag(
                &get,
                "SMTP_ACCEPT_INVALID_CERTS",
                smtp_defaults.accept_invalid_certs,
            )?,
        };

        Ok(Self {
            port: number(&get, "PORT", 3000)?,
            recipients,
            enable_email,
            enable_file,
            data_path: get("DATA_PATH").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
            journal_mode,
            captcha: CaptchaConfig {
                secret,
                verify_url: get("CAPTCHA_VERIFY_URL")
                    .unwrap_or_else(|| DEFAULT_CAPTCHA_VERIFY_URL.to_string()),
            },
            smtp,
            mail_from: get("MAIL_FROM").unwrap_or_else(|| DEFAULT_MAIL_FROM.to_string()),
        })
    }

    /// Logs the effective configuration without secrets.
    pub fn log_summary(&self) {
        tracing::info!(
            port = self.port,
            enable_email = self.enable_email,
            enable_file = self.enable_file,
            recipients = self.recipients.len(),
            data_path = %self.data_path.display(),
            journal_mode = ?self.journal_mode,
            smtp_host = %self.smtp.host,
            smtp_port = self.smtp.port,
            smtp_security = ?self.smtp.security,
            smtp_auth = self.smtp.username.is_some(),
            captcha_secret_set = !self.captcha.secret.is_empty(),
            "configuration loaded"
        );
    }
}

fn flag(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = get(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got `{value}`"),
        }),
    }
}

fn number(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u16,
) -> Result<u16, ConfigError> {
    get(key).map_or(Ok(default), |value| {
        value.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("expected a port number, got `{value}`"),
        })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_match_local_bridge_deployment() {
        let cfg = config(&[("CAPTCHA_SECRET_KEY", "s"), ("EMAILS", "a@x.org")]).unwrap();
        assert_eq!(cfg.port, 3000);
        assert!(cfg.enable_email);
        assert!(!cfg.enable_file);
        assert_eq!(cfg.smtp.host, "127.0.0.1");
        assert_eq!(cfg.smtp.port, 1025);
        assert_eq!(cfg.smtp.security, Security::None);
        assert!(cfg.smtp.accept_invalid_certs);
        assert_eq!(cfg.journal_mode, JournalMode::Shared);
        assert_eq!(cfg.mail_from, DEFAULT_MAIL_FROM);
        assert_eq!(cfg.captcha.verify_url, DEFAULT_CAPTCHA_VERIFY_URL);
    }

    #[test]
    fn parses_recipient_list_and_toggles() {
        let cfg = config(&[
            ("CAPTCHA_SECRET_KEY", "s"),
            ("EMAILS", " a@x.org, b@x.org ,,"),
            ("ENABLE_FILE", "yes"),
            ("ENABLE_EMAIL", "TRUE"),
            ("JOURNAL_MODE", "per-submission"),
            ("DATA_PATH", "/var/lib/memoryhole"),
        ])
        .unwrap();
        assert_eq!(cfg.recipients, vec!["a@x.org", "b@x.org"]);
        assert!(cfg.enable_file);
        assert_eq!(cfg.journal_mode, JournalMode::PerSubmission);
        assert_eq!(cfg.data_path, PathBuf::from("/var/lib/memoryhole"));
    }

    #[test]
    fn accepts_legacy_bridge_credentials() {
        let cfg = config(&[
            ("CAPTCHA_SECRET_KEY", "s"),
            ("ENABLE_EMAIL", "false"),
            ("PROTONMAIL_LOGIN", "bridge-user"),
            ("PROTONMAIL_PW", "bridge-pass"),
        ])
        .unwrap();
        assert_eq!(cfg.smtp.username.as_deref(), Some("bridge-user"));
        assert_eq!(cfg.smtp.password.as_deref(), Some("bridge-pass"));
    }

    #[test]
    fn requires_captcha_secret() {
        let err = config(&[("ENABLE_EMAIL", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CAPTCHA_SECRET_KEY")));
    }

    #[test]
    fn requires_recipients_when_email_enabled() {
        let err = config(&[("CAPTCHA_SECRET_KEY", "s")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "EMAILS", .. }));
    }

    #[test]
    fn rejects_malformed_values() {
        let base = [("CAPTCHA_SECRET_KEY", "s"), ("ENABLE_EMAIL", "0")];
        for (key, value) in [
            ("ENABLE_FILE", "maybe"),
            ("PORT", "http"),
            ("SMTP_SECURITY", "ssl3"),
            ("JOURNAL_MODE", "sqlite"),
        ] {
            let mut pairs = base.to_vec();
            pairs.push((key, value));
            assert!(config(&pairs).is_err(), "{key}={value} should be rejected");
        }
    }

    #[test]
    fn debug_output_redacts_secret() {
        let cfg = config(&[
            ("CAPTCHA_SECRET_KEY", "hunter2"),
            ("ENABLE_EMAIL", "0"),
            ("SMTP_PASSWORD", "correct-horse"),
        ])
        .unwrap();
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("correct-horse"));
    }
}
