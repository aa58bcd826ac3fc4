//! # memoryhole-core
//!
//! Intake pipeline for the legal support form.
//!
//! A submission is checked against the captcha service, then written to
//! the on-disk journal and emailed to the legal team, each only if
//! enabled:
//!
//! - [`CaptchaVerifier`]: score-threshold check against a `siteverify`
//!   endpoint
//! - [`JournalWriter`]: shared newline-delimited log or one file per
//!   submission, both under an exclusive advisory lock
//! - [`NotificationSender`]: HTML table email over SMTP
//! - [`IntakeCoordinator`]: runs the above and decides the outcome
//!
//! Components receive their configuration at construction time, so tests
//! can swap any of them for a fake.

#![forbid(unsafe_code)]

pub mod captcha;
pub mod config;
mod error;
pub mod intake;
pub mod journal;
pub mod notify;
pub mod record;

pub use captcha::{CaptchaError, CaptchaVerdict, CaptchaVerifier, MIN_SCORE, RecaptchaVerifier};
pub use config::{CaptchaConfig, Config, Security, SmtpConfig};
pub use error::{ConfigError, Error, Result};
pub use intake::{IntakeCoordinator, IntakeError, IntakeState, Receipt, Sink, SinkFailure};
pub use journal::{JournalError, JournalMode, JournalWriter, LockRetry};
pub use notify::{MailError, MailTransport, NotificationSender, OutgoingMessage, SmtpTransport};
pub use record::{Submission, SubmissionRecord};
