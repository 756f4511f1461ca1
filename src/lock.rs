// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Campaign lock.
//!
//! Apply and Restore both perform read-then-write sequences against the host's
//! files, most importantly the backup existence check. Two campaigns running at
//! once could both see "no backup yet", and the later one would snapshot bytes
//! that were already patched. To rule that out, every campaign operation holds
//! a lock file in the state directory for its whole duration.
//!
//! The lock is a plain file created with `O_EXCL` semantics, so it also guards
//! against a second hostpatch process, not just a second thread.

use std::{
    fs::{remove_file, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    thread::sleep,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

const LOCK_FILE: &str = "campaign.lock";

/// Held campaign lock. Released on drop.
#[derive(Debug)]
pub struct CampaignLock {
    path: PathBuf,
}

impl CampaignLock {
    /// Acquire campaign lock inside `state_dir`, waiting up to `timeout`.
    ///
    /// Creates the state directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::CreateDir`] if state directory cannot be made.
    /// - Return [`LockError::Timeout`] if another campaign holds the lock for
    ///   longer than `timeout`.
    /// - Return [`LockError::Acquire`] for any other I/O failure.
    pub fn acquire(state_dir: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        mkdirp::mkdirp(state_dir).map_err(|err| LockError::CreateDir {
            source: err,
            path: state_dir.to_path_buf(),
        })?;

        let path = state_dir.join(LOCK_FILE);
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    debug!("acquired campaign lock {:?}", path.display());
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(LockError::Timeout { path });
                    }
                    sleep(Duration::from_millis(50));
                }
                Err(err) => return Err(LockError::Acquire { source: err, path }),
            }
        }
    }
}

impl Drop for CampaignLock {
    fn drop(&mut self) {
        debug!("release campaign lock {:?}", self.path.display());
        if let Err(err) = remove_file(&self.path) {
            warn!(
                "failed to remove campaign lock {:?}, remove it by hand: {err}",
                self.path.display()
            );
        }
    }
}

/// Campaign lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// State directory cannot be created.
    #[error("failed to create state directory at {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Another campaign kept the lock for too long.
    #[error(
        "another apply or restore is in progress (lock file {:?}); remove it if no hostpatch process is running",
        path.display()
    )]
    Timeout { path: PathBuf },

    /// Lock file cannot be created.
    #[error("failed to create lock file at {:?}", path.display())]
    Acquire {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LockError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_times_out_until_release() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let lock = CampaignLock::acquire(dir.path(), Duration::from_millis(10))?;

        let contended = CampaignLock::acquire(dir.path(), Duration::from_millis(100));
        assert!(matches!(contended, Err(LockError::Timeout { .. })));

        drop(lock);
        let _relock = CampaignLock::acquire(dir.path(), Duration::from_millis(10))?;

        Ok(())
    }

    #[test]
    fn release_survives_vanished_lock_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let lock = CampaignLock::acquire(dir.path(), Duration::from_millis(10))?;
        remove_file(dir.path().join(LOCK_FILE))?;
        drop(lock);

        let _relock = CampaignLock::acquire(dir.path(), Duration::from_millis(10))?;

        Ok(())
    }

    #[test]
    fn acquire_creates_state_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("a").join("b");
        let _lock = CampaignLock::acquire(&nested, Duration::from_millis(10))?;
        assert!(nested.join(LOCK_FILE).exists());

        Ok(())
    }
}
