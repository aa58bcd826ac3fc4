//! Error types for the core library.

use thiserror::Error;

/// Configuration problems found at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required option is not set.
    #[error("missing required setting {0}")]
    Missing(&'static str),

    /// An option is set to something unusable.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Errors that can occur while wiring the pipeline together.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The journal could not be prepared.
    #[error("Journal error: {0}")]
    Journal(#[from] crate::journal::JournalError),

    /// The captcha client could not be built.
    #[error("Captcha error: {0}")]
    Captcha(#[from] crate::captcha::CaptchaError),

    /// A sender or recipient address is unusable.
    #[error("Mail error: {0}")]
    Mail(#[from] crate::notify::MailError),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
