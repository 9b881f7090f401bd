//! Invocation-wide mutual exclusion.
//!
//! Two overlapping `qaqc-auto run` invocations (a slow cron tick and the
//! next one) would read the same snapshot and dispatch the same issue. The
//! second one waits briefly for the first and then gives up with
//! [`QaqcError::LockTimeout`].

use crate::error::QaqcError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lock file name placed next to the store database.
pub const LOCK_FILE_NAME: &str = "qaqc-auto.lock";

const POLL: Duration = Duration::from_millis(10);

/// Exclusive `fs2` lock on the lock file, held until dropped.
#[derive(Debug)]
pub struct InvocationLock {
    file: File,
    path: PathBuf,
}

impl InvocationLock {
    /// Take the lock, polling until `timeout` has passed. The holder's pid is
    /// written into the file for operators chasing a stuck invocation.
    ///
    /// # Errors
    ///
    /// [`QaqcError::LockTimeout`] if another process still holds the lock
    /// after `timeout`; [`QaqcError::LockIo`] if the file cannot be opened.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, QaqcError> {
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)?,
            Some(_) => {}
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "lock path has no parent directory",
                )
                .into());
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        while file.try_lock_exclusive().is_err() {
            if Instant::now() >= deadline {
                return Err(QaqcError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: timeout,
                });
            }
            thread::sleep(POLL);
        }

        file.set_len(0)?;
        file.rewind()?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "invocation lock acquired");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// `qaqc-auto.lock` in the store's directory.
    #[must_use]
    pub fn path_for_store(store_path: &Path) -> PathBuf {
        match store_path.parent() {
            Some(dir) => dir.join(LOCK_FILE_NAME),
            None => PathBuf::from(LOCK_FILE_NAME),
        }
    }

    /// Unlock now rather than at end of scope.
    pub fn release(self) {
        drop(self);
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InvocationLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!(path = %self.path.display(), error = %err, "invocation lock unlock failed");
        }
    }
}
