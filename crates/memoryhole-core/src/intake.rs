//! The intake pipeline: verify, then fan out to the enabled sinks.
//!
//! ```text
//! Received -> Verifying -> Verified -> Persisting -> Completed
//!                      \-> Rejected              \-> PartiallyFailed
//! ```
//!
//! A rejected submission never reaches a sink. A verified one is handed to
//! the journal and the notifier concurrently, each on its own task. Both
//! run to completion even if the caller goes away, and the request fails
//! if either of them failed.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::captcha::{CaptchaError, CaptchaVerifier, RecaptchaVerifier};
use crate::config::Config;
use crate::error::Result;
use crate::journal::{self, JournalError, JournalWriter, LockRetry};
use crate::notify::{MailError, NotificationSender, SmtpTransport};
use crate::record::Submission;

/// Where a submission is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeState {
    /// Payload arrived.
    Received,
    /// Waiting on the captcha service.
    Verifying,
    /// Captcha passed.
    Verified,
    /// Captcha failed; terminal.
    Rejected,
    /// Sinks running.
    Persisting,
    /// Every enabled sink succeeded; terminal.
    Completed,
    /// At least one enabled sink failed; terminal.
    PartiallyFailed,
}

/// A downstream destination for submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// The on-disk journal.
    Journal,
    /// The notification email.
    Email,
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Journal => "journal",
            Self::Email => "email",
        })
    }
}

/// One sink's failure.
#[derive(Debug, thiserror::Error)]
pub enum SinkFailure {
    /// The journal write failed.
    #[error("journal: {0}")]
    Journal(#[from] JournalError),
    /// The email could not be delivered.
    #[error("email: {0}")]
    Email(#[from] MailError),
    /// The sink's task panicked or was cancelled by the runtime.
    #[error("{sink}: task aborted: {reason}")]
    Aborted {
        /// Sink whose task died.
        sink: Sink,
        /// Panic or cancellation message.
        reason: String,
    },
}

impl SinkFailure {
    /// The sink that failed.
    #[must_use]
    pub const fn sink(&self) -> Sink {
        match self {
            Self::Journal(_) => Sink::Journal,
            Self::Email(_) => Sink::Email,
            Self::Aborted { sink, .. } => *sink,
        }
    }

    fn aborted(sink: Sink, err: &tokio::task::JoinError) -> Self {
        Self::Aborted {
            sink,
            reason: err.to_string(),
        }
    }
}

/// Why a submission did not complete.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// The captcha check failed; nothing was stored or sent.
    #[error("{0}")]
    Rejected(CaptchaError),

    /// One or more enabled sinks failed. Sinks not listed succeeded.
    #[error("submission failed: {}", join(.0))]
    SinkFailed(Vec<SinkFailure>),
}

impl IntakeError {
    /// Terminal state the submission ended in.
    #[must_use]
    pub const fn state(&self) -> IntakeState {
        match self {
            Self::Rejected(_) => IntakeState::Rejected,
            Self::SinkFailed(_) => IntakeState::PartiallyFailed,
        }
    }
}

fn join(failures: &[SinkFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of a completed submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    /// Captcha score the submission passed with.
    pub score: f64,
    /// Sinks that ran, in a fixed order (journal before email).
    pub sinks: Vec<Sink>,
    /// `Message-ID` of the notification, when email is enabled.
    pub message_id: Option<String>,
}

/// Runs submissions through verification and the enabled sinks.
///
/// Sinks are chosen once at construction; a sink that was not configured
/// is never attempted and never reported.
#[derive(Clone)]
pub struct IntakeCoordinator {
    verifier: Arc<dyn CaptchaVerifier>,
    journal: Option<Arc<dyn JournalWriter>>,
    notifier: Option<NotificationSender>,
}

impl fmt::Debug for IntakeCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntakeCoordinator")
            .field("journal", &self.journal.is_some())
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl IntakeCoordinator {
    /// Creates a coordinator with no sinks enabled.
    #[must_use]
    pub fn new(verifier: Arc<dyn CaptchaVerifier>) -> Self {
        Self {
            verifier,
            journal: None,
            notifier: None,
        }
    }

    /// Enables the journal sink.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<dyn JournalWriter>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Enables the email sink.
    #[must_use]
    pub fn with_notifier(mut self, notifier: NotificationSender) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Builds the production pipeline described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the captcha client cannot be built, the journal
    /// cannot be opened, or a mail address is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let verifier = RecaptchaVerifier::new(config.captcha.clone())?;
        let mut coordinator = Self::new(Arc::new(verifier));

        if config.enable_file {
            coordinator = coordinator.with_journal(journal::open(
                config.journal_mode,
                &config.data_path,
                LockRetry::default(),
            )?);
        }
        if config.enable_email {
            let transport = Arc::new(SmtpTransport::new(config.smtp.clone()));
            coordinator = coordinator.with_notifier(NotificationSender::new(
                transport,
                &config.mail_from,
                &config.recipients,
            )?);
        }
        Ok(coordinator)
    }

    /// Sinks this coordinator will run.
    #[must_use]
    pub fn enabled_sinks(&self) -> Vec<Sink> {
        let mut sinks = Vec::with_capacity(2);
        if self.journal.is_some() {
            sinks.push(Sink::Journal);
        }
        if self.notifier.is_some() {
            sinks.push(Sink::Email);
        }
        sinks
    }

    /// Processes one submission.
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError::Rejected`] if the captcha check fails, or
    /// [`IntakeError::SinkFailed`] if any enabled sink fails.
    pub async fn submit(&self, submission: Submission) -> std::result::Result<Receipt, IntakeError> {
        let Submission { data: record, token } = submission;
        info!(fields = record.len(), "submission received");

        debug!(state = ?IntakeState::Verifying, "checking captcha");
        let score = self
            .verifier
            .verify(&token)
            .await
            .map_err(IntakeError::Rejected)?;
        info!(score, "submission verified");

        debug!(state = ?IntakeState::Persisting, sinks = ?self.enabled_sinks(), "dispatching");
        // Sinks run as their own tasks: once started they finish even if the
        // caller stops waiting.
        let record = Arc::new(record);
        let journal = self.journal.clone().map(|journal| {
            let record = Arc::clone(&record);
            tokio::spawn(async move { journal.append(&record).await })
        });
        let notifier = self.notifier.clone().map(|notifier| {
            let record = Arc::clone(&record);
            tokio::spawn(async move { notifier.send(&record).await })
        });

        let mut failures = Vec::new();
        if let Some(task) = journal {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(SinkFailure::Journal(e)),
                Err(e) => failures.push(SinkFailure::aborted(Sink::Journal, &e)),
            }
        }
        let mut message_id = None;
        if let Some(task) = notifier {
            match task.await {
                Ok(Ok(id)) => message_id = Some(id),
                Ok(Err(e)) => failures.push(SinkFailure::Email(e)),
                Err(e) => failures.push(SinkFailure::aborted(Sink::Email, &e)),
            }
        }

        if !failures.is_empty() {
            for failure in &failures {
                warn!(sink = %failure.sink(), error = %failure, "sink failed");
            }
            return Err(IntakeError::SinkFailed(failures));
        }

        let sinks = self.enabled_sinks();
        info!(sinks = ?sinks, message_id = ?message_id, "submission completed");
        Ok(Receipt {
            score,
            sinks,
            message_id,
        })
    }
}
