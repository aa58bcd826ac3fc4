//! Shared-log layout: one newline-delimited JSON file for all submissions.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{JournalError, JournalWriter, LockRetry, LockedFile, blocking, restrict_permissions};
use crate::record::SubmissionRecord;

/// A single journal file shared by every writer.
#[derive(Debug, Clone)]
pub struct SharedLog {
    path: PathBuf,
    retry: LockRetry,
}

impl SharedLog {
    /// Creates the file (and parent directories) if absent and restricts it
    /// to owner read/write.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::IoFailure`] if the file cannot be created or
    /// its mode cannot be set.
    pub fn open(path: impl Into<PathBuf>, retry: LockRetry) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| JournalError::io(parent, e))?;
        }

        let file = open_for_append(&path)?;
        restrict_permissions(&file, &path)?;
        debug!(path = %path.display(), "shared journal ready");

        Ok(Self { path, retry })
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JournalWriter for SharedLog {
    async fn append(&self, record: &SubmissionRecord) -> Result<(), JournalError> {
        let mut line = record.to_json_line()?;
        line.push(b'\n');

        // A fresh descriptor per append: flock excludes other descriptors,
        // including ones held by concurrent tasks in this process.
        let path = self.path.clone();
        let file = blocking(&self.path, move || open_for_append(&path)).await?;
        let locked = LockedFile::acquire(file, &self.path, self.retry).await?;

        blocking(&self.path, move || write_record(&locked, &line)).await?;
        debug!(path = %self.path.display(), "record appended to shared journal");
        Ok(())
    }
}

fn open_for_append(path: &Path) -> Result<File, JournalError> {
    let mut options = OpenOptions::new();
    options.read(true).append(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|e| JournalError::io(path, e))
}

/// Writes `line` at the end of the locked file in one call.
///
/// If an earlier writer died mid-record the file will not end in a newline;
/// the new record then starts on a fresh line so the torn tail stays
/// confined to its own line.
fn write_record(locked: &LockedFile, line: &[u8]) -> Result<(), JournalError> {
    let path = locked.path();
    let mut file = locked.file();
    let io_err = |e| JournalError::io(path, e);

    let len = file.metadata().map_err(io_err)?.len();
    let mut buf = Vec::with_capacity(line.len() + 1);
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1)).map_err(io_err)?;
        file.read_exact(&mut last).map_err(io_err)?;
        if last[0] != b'\n' {
            warn!(path = %path.display(), "journal ends in a partial record, starting a new line");
            buf.push(b'\n');
        }
    }
    buf.extend_from_slice(line);

    file.write_all(&buf).map_err(io_err)?;
    file.sync_data().map_err(io_err)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    fn record(value: Value) -> SubmissionRecord {
        serde_json::from_value(value).unwrap()
    }

    fn contention_retry() -> LockRetry {
        LockRetry {
            retries: 500,
            min: Duration::from_millis(1),
            max: Duration::from_millis(5),
            factor: 1.5,
            randomize: true,
        }
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn creates_file_and_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/journal.jsonl");
        let log = SharedLog::open(&path, LockRetry::default()).unwrap();
        assert!(log.path().exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn tightens_permissions_of_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        fs::write(&path, b"").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        SharedLog::open(&path, LockRetry::default()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let log = SharedLog::open(&path, LockRetry::default()).unwrap();

        log.append(&record(json!({"legal_first_name": "Fakey", "minor": false})))
            .await
            .unwrap();
        log.append(&record(json!({"notes": "two\nlines", "age": 31})))
            .await
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["legal_first_name"], "Fakey");
        assert_eq!(lines[1]["notes"], "two\nlines");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_never_interleave() {
        const WRITERS: usize = 64;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let log = Arc::new(SharedLog::open(&path, contention_retry()).unwrap());

        let padding = "x".repeat(16 * 1024);
        let tasks: Vec<_> = (0..WRITERS)
            .map(|i| {
                let log = Arc::clone(&log);
                let rec = record(json!({"writer": i, "padding": padding}));
                tokio::spawn(async move { log.append(&rec).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let lines = read_lines(&path);
        assert_eq!(lines.len(), WRITERS);
        let mut writers: Vec<u64> = lines.iter().map(|l| l["writer"].as_u64().unwrap()).collect();
        writers.sort_unstable();
        assert_eq!(writers, (0..WRITERS as u64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn torn_tail_does_not_swallow_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        fs::write(&path, b"{\"complete\":true}\n{\"torn\":").unwrap();

        let log = SharedLog::open(&path, LockRetry::default()).unwrap();
        log.append(&record(json!({"after": "crash"}))).await.unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "{\"complete\":true}");
        assert_eq!(lines[1], "{\"torn\":");
        assert_eq!(lines[2], "{\"after\":\"crash\"}");
    }

    #[tokio::test]
    async fn open_failure_is_reported_as_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone/journal.jsonl");
        let log = SharedLog::open(&path, LockRetry::default()).unwrap();
        fs::remove_dir_all(dir.path().join("gone")).unwrap();

        let err = log.append(&record(json!({"a": 1}))).await.unwrap_err();
        assert!(matches!(err, JournalError::IoFailure { ref path, .. } if path.ends_with("journal.jsonl")));
    }

    #[tokio::test]
    async fn lock_held_elsewhere_times_out() {
        use fs2::FileExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let retry = LockRetry {
            retries: 2,
            min: Duration::from_millis(5),
            max: Duration::from_millis(10),
            factor: 2.0,
            randomize: false,
        };
        let log = SharedLog::open(&path, retry).unwrap();

        let other_process = File::open(&path).unwrap();
        other_process.lock_exclusive().unwrap();

        let err = log.append(&record(json!({"a": 1}))).await.unwrap_err();
        assert!(matches!(err, JournalError::LockTimeout { attempts: 3, .. }));
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }
}
