use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::vcs::error::SyncError;

/// Suffix appended to the guarded file's path to form the lock file path.
pub const LOCK_SUFFIX: &str = ".write.lock";

/// How long to wait for a competing holder before giving up.
pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Exclusive advisory lock on a log file, taken by atomically creating a
/// sibling `.write.lock` file. Released on drop.
///
/// Both the fetcher (writer) and the parser (reader) take this lock, so a
/// reader never observes a half-written log.
#[derive(Debug)]
pub struct LogLock {
    lock_path: PathBuf,
}

impl LogLock {
    /// Acquire the lock for `file`, polling for up to [`LOCK_ACQUIRE_TIMEOUT`].
    pub async fn acquire(file: &Path) -> Result<Self, SyncError> {
        Self::acquire_with_timeout(file, LOCK_ACQUIRE_TIMEOUT).await
    }

    pub async fn acquire_with_timeout(file: &Path, timeout: Duration) -> Result<Self, SyncError> {
        let mut lock_path = file.as_os_str().to_owned();
        lock_path.push(LOCK_SUFFIX);
        let lock_path = PathBuf::from(lock_path);

        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(_) => {
                    debug!(lock = %lock_path.display(), "acquired log lock");
                    return Ok(Self { lock_path });
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(SyncError::LockTimeout { lock_path, waited: timeout });
                    }
                    sleep(POLL_INTERVAL).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for LogLock {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.lock_path) {
            warn!(lock = %self.lock_path.display(), %error, "failed to release log lock");
        }
    }
}
