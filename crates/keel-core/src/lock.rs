//! Advisory per-package locks for the binary cache.
//!
//! Each `(reference, package_id)` folder in the cache has one lock file.
//! Readers checking for a cache hit hold a shared lock; a writer committing
//! a freshly built binary holds an exclusive lock, so a reader never sees a
//! half-written package folder.

use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

/// Poll interval while waiting for a contended lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Advisory lock errors for package folders.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock timed out after {waited:?} at {}", .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("lock file I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::CacheWriteFailed,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Whether a lock admits other readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// RAII guard over one package lock file. Released on drop.
#[derive(Debug)]
pub struct PackageLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl PackageLock {
    /// Take a shared (read) lock, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if a writer holds the lock for longer
    /// than `timeout`, or [`LockError::Io`] if the lock file cannot be opened.
    pub fn shared(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, timeout, LockMode::Shared)
    }

    /// Take an exclusive (write) lock, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if any other holder keeps the lock for
    /// longer than `timeout`, or [`LockError::Io`] on file errors.
    pub fn exclusive(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, timeout, LockMode::Exclusive)
    }

    fn acquire(path: &Path, timeout: Duration, mode: LockMode) -> Result<Self, LockError> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "lock path has no parent")
        })?;
        fs::create_dir_all(parent)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            if attempt.is_ok() {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                    mode,
                });
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Return the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    /// Explicitly release the lock. Release also happens on drop.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
