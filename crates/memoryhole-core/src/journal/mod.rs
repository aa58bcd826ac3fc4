//! Durable, append-only record of submissions.
//!
//! Two layouts share one contract: a single newline-delimited JSON file
//! ([`SharedLog`]) or one JSON file per submission
//! ([`PerSubmissionFiles`]). Either way every write happens under an
//! exclusive advisory lock, so concurrent requests and concurrent service
//! instances never interleave bytes, and files are readable only by the
//! owning user.

mod lock;
mod per_submission;
mod shared;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

pub use lock::{LockRetry, LockedFile};
pub use per_submission::PerSubmissionFiles;
pub use shared::SharedLog;

use crate::record::SubmissionRecord;

/// Journal failures.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Another writer held the lock through every retry.
    #[error("journal {} still locked after {attempts} attempts", path.display())]
    LockTimeout {
        /// Locked file.
        path: PathBuf,
        /// Attempts made.
        attempts: u32,
    },

    /// Filesystem failure; not retried.
    #[error("journal I/O failure on {}: {source}", path.display())]
    IoFailure {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The record could not be serialized.
    #[error("journal serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl JournalError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::IoFailure {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Which layout the journal uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    /// One growing newline-delimited JSON file.
    #[default]
    Shared,
    /// One `<timestamp>.json` file per submission.
    PerSubmission,
}

impl JournalMode {
    /// Parses `shared` / `per-submission` (and a few spellings of each).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shared" | "log" | "jsonl" => Some(Self::Shared),
            "per-submission" | "per_submission" | "files" => Some(Self::PerSubmission),
            _ => None,
        }
    }
}

/// Appends submissions to durable storage.
#[async_trait]
pub trait JournalWriter: Send + Sync {
    /// Appends one record atomically with respect to other writers.
    async fn append(&self, record: &SubmissionRecord) -> Result<(), JournalError>;
}

/// File name of the shared log inside the data directory.
pub const SHARED_LOG_FILE: &str = "submissions.jsonl";

/// Opens the journal for `mode` in directory `dir`, creating it if needed.
///
/// # Errors
///
/// Returns [`JournalError::IoFailure`] if the file or directory cannot be
/// created or its permissions cannot be restricted.
pub fn open(
    mode: JournalMode,
    dir: &Path,
    retry: LockRetry,
) -> Result<Arc<dyn JournalWriter>, JournalError> {
    Ok(match mode {
        JournalMode::Shared => Arc::new(SharedLog::open(dir.join(SHARED_LOG_FILE), retry)?),
        JournalMode::PerSubmission => Arc::new(PerSubmissionFiles::open(dir, retry)?),
    })
}

/// Restricts `path` to owner read/write.
#[cfg(unix)]
pub(crate) fn restrict_permissions(file: &std::fs::File, path: &Path) -> Result<(), JournalError> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .map_err(|e| JournalError::io(path, e))
}

#[cfg(not(unix))]
pub(crate) fn restrict_permissions(_file: &std::fs::File, _path: &Path) -> Result<(), JournalError> {
    Ok(())
}

/// Runs blocking file work on the blocking pool.
pub(crate) async fn blocking<T, F>(path: &Path, work: F) -> Result<T, JournalError>
where
    F: FnOnce() -> Result<T, JournalError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| JournalError::io(path, io::Error::other(e)))?
}
