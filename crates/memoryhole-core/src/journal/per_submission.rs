//! Per-submission layout: each record in its own `<timestamp>.json` file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use super::{JournalError, JournalWriter, LockRetry, LockedFile, blocking, restrict_permissions};
use crate::record::SubmissionRecord;

/// A directory holding one JSON file per submission.
///
/// Files are named by a microsecond UTC timestamp. Two submissions in the
/// same microsecond map to the same name; the later write replaces the
/// earlier one in full.
#[derive(Debug, Clone)]
pub struct PerSubmissionFiles {
    dir: PathBuf,
    retry: LockRetry,
}

impl PerSubmissionFiles {
    /// Creates the directory if absent (mode `0700` on Unix).
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::IoFailure`] if the directory cannot be
    /// created.
    pub fn open(dir: impl Into<PathBuf>, retry: LockRetry) -> Result<Self, JournalError> {
        let dir = dir.into();
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&dir).map_err(|e| JournalError::io(&dir, e))?;
        debug!(dir = %dir.display(), "per-submission journal ready");

        Ok(Self { dir, retry })
    }

    /// Directory holding the submission files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that a submission received at `at` is written to.
    #[must_use]
    pub fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{}.json", at.to_rfc3339_opts(SecondsFormat::Micros, true)))
    }

    /// Writes `record` to `path`: create, lock, replace contents, restrict
    /// mode, unlock.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::LockTimeout`] if the file stays locked, or
    /// [`JournalError::IoFailure`] / [`JournalError::Serialize`] otherwise.
    pub async fn write_to(&self, path: PathBuf, record: &SubmissionRecord) -> Result<(), JournalError> {
        let mut body = record.to_json_line()?;
        body.push(b'\n');

        let target = path.clone();
        let file = blocking(&path, move || create(&target)).await?;
        let locked = LockedFile::acquire(file, &path, self.retry).await?;

        blocking(&path, move || replace_contents(&locked, &body)).await?;
        debug!(path = %path.display(), "submission written");
        Ok(())
    }
}

#[async_trait]
impl JournalWriter for PerSubmissionFiles {
    async fn append(&self, record: &SubmissionRecord) -> Result<(), JournalError> {
        self.write_to(self.path_for(Utc::now()), record).await
    }
}

fn create(path: &Path) -> Result<File, JournalError> {
    let mut options = OpenOptions::new();
    // No truncate here: an existing file may be locked by its writer, and
    // its contents are only replaced once we hold the lock.
    options.write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|e| JournalError::io(path, e))
}

fn replace_contents(locked: &LockedFile, body: &[u8]) -> Result<(), JournalError> {
    let path = locked.path();
    let mut file = locked.file();
    let io_err = |e| JournalError::io(path, e);

    file.set_len(0).map_err(io_err)?;
    file.write_all(body).map_err(io_err)?;
    file.sync_data().map_err(io_err)?;
    restrict_permissions(locked.file(), path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn record(value: Value) -> SubmissionRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn names_files_by_iso_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let files = PerSubmissionFiles::open(dir.path(), LockRetry::default()).unwrap();
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:30:45.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            files.path_for(at),
            dir.path().join("2024-05-01T12:30:45.123456Z.json")
        );
    }

    #[tokio::test]
    async fn writes_one_file_per_submission() {
        let dir = tempfile::tempdir().unwrap();
        let files = PerSubmissionFiles::open(dir.path().join("submissions"), LockRetry::default())
            .unwrap();

        files.append(&record(json!({"legal_first_name": "Fakey"}))).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        files.append(&record(json!({"legal_first_name": "Other"}))).await.unwrap();

        let mut names: Vec<PathBuf> = fs::read_dir(files.dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|p| p.extension().unwrap() == "json"));

        let first: Value = serde_json::from_slice(&fs::read(&names[0]).unwrap()).unwrap();
        assert_eq!(first["legal_first_name"], "Fakey");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn submission_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let files = PerSubmissionFiles::open(dir.path(), LockRetry::default()).unwrap();
        let path = files.path_for(Utc::now());
        files.write_to(path.clone(), &record(json!({"a": 1}))).await.unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn missing_directory_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let files = PerSubmissionFiles::open(dir.path().join("each"), LockRetry::default()).unwrap();
        fs::remove_dir(files.dir()).unwrap();

        let err = files.append(&record(json!({"a": 1}))).await.unwrap_err();
        assert!(matches!(err, JournalError::IoFailure { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn same_instant_collision_keeps_a_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let files = PerSubmissionFiles::open(dir.path(), LockRetry::default()).unwrap();
        let path = files.path_for(Utc::now());

        let long = record(json!({"notes": "y".repeat(4096)}));
        let short = record(json!({"notes": "short"}));
        files.write_to(path.clone(), &long).await.unwrap();
        files.write_to(path.clone(), &short).await.unwrap();

        let stored: SubmissionRecord = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, short);
    }
}
