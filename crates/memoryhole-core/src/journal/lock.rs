//! Advisory file locks with bounded, randomised retry.
//!
//! The lock is an `flock`-style exclusive lock on the journal file itself,
//! so every process that follows the same protocol is excluded, not just
//! tasks inside this one.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use rand::Rng;
use tracing::warn;

use super::JournalError;

/// Retry schedule for lock acquisition.
///
/// Delay before retry `n` (0-based) is `min * factor^n`, multiplied by a
/// random factor in `[1, 2)` when `randomize` is set, and capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockRetry {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Base delay.
    pub min: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Growth per retry.
    pub factor: f64,
    /// Spread concurrent writers apart.
    pub randomize: bool,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            retries: 5,
            min: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            randomize: true,
        }
    }
}

impl LockRetry {
    /// Delay before retry number `retry` (0-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let jitter = if self.randomize {
            rand::thread_rng().gen_range(1.0..2.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.min.as_secs_f64() * self.factor.powi(exponent) * jitter;
        if secs.is_finite() {
            Duration::from_secs_f64(secs).min(self.max)
        } else {
            self.max
        }
    }

    /// Total number of acquisition attempts.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// A file held under an exclusive lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
    path: PathBuf,
}

impl LockedFile {
    /// Takes the exclusive lock on `file`, retrying while another writer
    /// holds it.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::LockTimeout`] once every attempt found the
    /// lock held, or [`JournalError::IoFailure`] for any other failure
    /// (those are not retried).
    pub async fn acquire(file: File, path: &Path, retry: LockRetry) -> Result<Self, JournalError> {
        let mut retries_done = 0;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if is_contended(&e) => {
                    if retries_done >= retry.retries {
                        return Err(JournalError::LockTimeout {
                            path: path.to_path_buf(),
                            attempts: retry.attempts(),
                        });
                    }
                    let delay = retry.delay(retries_done);
                    retries_done += 1;
                    warn!(
                        path = %path.display(),
                        retry = retries_done,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "journal locked by another writer, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(JournalError::io(path, e)),
            }
        }
    }

    /// The locked file.
    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }

    /// Path the lock was taken on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn open(path: &Path) -> File {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap()
    }

    fn fast(retries: u32) -> LockRetry {
        LockRetry {
            retries,
            min: Duration::from_millis(10),
            max: Duration::from_millis(40),
            factor: 2.0,
            randomize: false,
        }
    }

    #[test]
    fn default_schedule_is_bounded() {
        let retry = LockRetry::default();
        assert_eq!(retry.attempts(), 6);
        for n in 0..retry.retries {
            let delay = retry.delay(n);
            assert!(delay >= Duration::from_secs(1), "retry {n}: {delay:?}");
            assert!(delay <= Duration::from_secs(60), "retry {n}: {delay:?}");
        }
        assert_eq!(retry.delay(40), Duration::from_secs(60));
    }

    #[test]
    fn deterministic_schedule_grows_then_caps() {
        let retry = fast(5);
        let (first, second, third) = (retry.delay(0), retry.delay(1), retry.delay(2));
        assert!(first < second && second < third, "{first:?} {second:?} {third:?}");
        assert!(third <= retry.max);
        assert_eq!(retry.delay(3), retry.max);
    }

    #[tokio::test]
    async fn times_out_while_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let holder = open(&path);
        holder.try_lock_exclusive().unwrap();

        let err = LockedFile::acquire(open(&path), &path, fast(2))
            .await
            .unwrap_err();
        assert!(
            matches!(err, JournalError::LockTimeout { attempts: 3, .. }),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn succeeds_once_holder_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let holder = LockedFile::acquire(open(&path), &path, fast(0)).await.unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            drop(holder);
        });

        let locked = LockedFile::acquire(open(&path), &path, fast(5)).await.unwrap();
        assert_eq!(locked.path(), path.as_path());
        release.await.unwrap();
    }
}
