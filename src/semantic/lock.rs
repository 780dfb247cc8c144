//! Cross-process write exclusion for the vector table.
//!
//! Multiple OS processes may share one index directory, so every locked
//! transaction acquires a lockfile with an atomic create-if-absent open. A
//! holder that crashes leaves the file behind; its mtime is used for
//! staleness detection and locks older than [`LOCK_STALE`] are stolen.
//! Stealing deletes the stale file and retries creation, so when several
//! waiters race to steal, exactly one wins the subsequent `create_new`.

use crate::types::{IndexError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Age after which a lockfile is presumed abandoned by a crashed holder.
pub const LOCK_STALE: Duration = Duration::from_secs(30);

/// Interval between acquisition attempts.
pub const LOCK_POLL: Duration = Duration::from_millis(50);

/// Deadline after which acquisition fails loudly instead of hanging.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Held write lock; the lockfile is removed on drop.
pub struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    /// Acquire the lock at `path` with the default deadline and staleness
    /// threshold.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::LockTimeout` if the lock cannot be acquired
    /// within [`LOCK_TIMEOUT`].
    pub async fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with(path, LOCK_TIMEOUT, LOCK_STALE).await
    }

    /// Acquire with explicit deadline and staleness threshold.
    pub async fn acquire_with(path: &Path, timeout: Duration, stale: Duration) -> Result<Self> {
        let start = Instant::now();

        loop {
            // Every path through the loop body comes back here, so the
            // deadline bounds stale-steal retries too.
            if start.elapsed() >= timeout {
                return Err(IndexError::LockTimeout(timeout.as_millis() as u64));
            }

            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // Owner token is diagnostic only; exclusion comes from
                    // the atomic create.
                    let token = format!("{}:{}\n", std::process::id(), Uuid::new_v4());
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        warn!(error = %e, "failed to write lock owner token");
                    }
                    debug!(path = %path.display(), "acquired write lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(path, stale) {
                        warn!(path = %path.display(), "stealing stale write lock");
                        match std::fs::remove_file(path) {
                            // Removed (or a concurrent stealer beat us to
                            // it): retry the create immediately.
                            Ok(_) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            // Undeletable stale lock: back off instead of
                            // spinning until the deadline.
                            Err(_) => tokio::time::sleep(LOCK_POLL).await,
                        }
                        continue;
                    }

                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_stale(path: &Path, stale: Duration) -> bool {
        let age = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .and_then(|mtime| {
                mtime
                    .elapsed()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            });
        matches!(age, Ok(age) if age >= stale)
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to release write lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_path(dir: &TempDir) -> PathBuf {
        dir.path().join("write.lock")
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let lock = WriteLock::acquire(&path).await.unwrap();
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let _held = WriteLock::acquire(&path).await.unwrap();
        let result =
            WriteLock::acquire_with(&path, Duration::from_millis(200), LOCK_STALE).await;

        assert!(matches!(result, Err(IndexError::LockTimeout(_))));
    }

    #[tokio::test]
    async fn test_exactly_one_of_two_contenders_wins() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let p1 = path.clone();
        let p2 = path.clone();
        let a = tokio::spawn(async move {
            WriteLock::acquire_with(&p1, Duration::from_millis(300), LOCK_STALE).await
        });
        let b = tokio::spawn(async move {
            WriteLock::acquire_with(&p2, Duration::from_millis(300), LOCK_STALE).await
        });

        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        let wins = [&ra, &rb].iter().filter(|r| r.is_ok()).count();

        // Winners hold their guard until here, so at most one can succeed.
        assert_eq!(wins, 1, "exactly one contender must acquire the lock");
    }

    #[tokio::test]
    async fn test_stale_lock_is_stolen() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        // Abandoned lock from a "crashed" holder.
        std::fs::write(&path, "999999:dead").unwrap();

        // Zero staleness threshold: the existing file is immediately stale.
        let lock = WriteLock::acquire_with(&path, Duration::from_millis(500), Duration::ZERO)
            .await
            .unwrap();
        assert!(path.exists());
        drop(lock);
    }

    #[tokio::test]
    async fn test_undeletable_stale_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        // A directory at the lock path can neither be created over nor
        // removed with remove_file, so stealing always fails.
        std::fs::create_dir(&path).unwrap();

        let start = std::time::Instant::now();
        let result =
            WriteLock::acquire_with(&path, Duration::from_millis(300), Duration::ZERO).await;

        assert!(matches!(result, Err(IndexError::LockTimeout(_))));
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_reacquire_after_release() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        drop(WriteLock::acquire(&path).await.unwrap());
        let again = WriteLock::acquire_with(&path, Duration::from_millis(500), LOCK_STALE).await;
        assert!(again.is_ok());
    }
}
