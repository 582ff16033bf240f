//! File-based inter-process locks.
//!
//! One [`FileLock`] trait with the implementation picked at compile time:
//! `flock(2)` on Unix, the standard library's native file locking elsewhere.
//! Use [`PlatformLock`] to get the right one.
//!
//! While held, the lock file contains the owner's pid and thread. On release
//! the file is emptied but left in place: removing it would let a second
//! process lock a fresh inode while a third still holds the old one.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from file locks.
#[derive(Debug, Error)]
pub enum LockError {
    /// Locked twice through the same handle, or released while not locked.
    #[error("illegal state: {reason} ({})", path.display())]
    IllegalState {
        path: PathBuf,
        reason: &'static str,
    },

    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An exclusive, non-blocking lock on a file.
pub trait FileLock {
    /// Try to take the lock. `Ok(false)` means someone else holds it.
    fn try_lock(&mut self) -> Result<bool, LockError>;

    /// Release a lock taken with `try_lock`.
    fn release_lock(&mut self) -> Result<(), LockError>;

    fn is_locked(&self) -> bool;

    fn path(&self) -> &Path;
}

/// The lock implementation for this platform.
#[cfg(unix)]
pub type PlatformLock = FlockLock;

/// The lock implementation for this platform.
#[cfg(not(unix))]
pub type PlatformLock = NativeLock;

/// Releases the lock when dropped.
#[derive(Debug)]
pub struct LockGuard<L: FileLock> {
    lock: L,
}

impl<L: FileLock> LockGuard<L> {
    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

impl<L: FileLock> Drop for LockGuard<L> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release_lock() {
            tracing::warn!("failed to release lock: {}", e);
        }
    }
}

/// Try to lock `path`, returning a guard if the lock was free.
pub fn acquire_file_lock(
    path: impl Into<PathBuf>,
) -> Result<Option<LockGuard<PlatformLock>>, LockError> {
    let mut lock = PlatformLock::new(path);
    if lock.try_lock()? {
        Ok(Some(LockGuard { lock }))
    } else {
        Ok(None)
    }
}

fn lock_info() -> String {
    format!(
        "PID: {} THREAD: {:?}",
        std::process::id(),
        std::thread::current().id()
    )
}

fn open_lock_file(path: &Path) -> Result<File, LockError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace the file's contents with `contents`.
fn rewrite(file: &mut File, contents: &str) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(contents.as_bytes())?;
    file.flush()
}

#[cfg(unix)]
pub use self::flock::FlockLock;

#[cfg(unix)]
mod flock {
    use std::fs::File;
    use std::path::{Path, PathBuf};

    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    use super::{FileLock, LockError, lock_info, open_lock_file, rewrite};

    /// `flock(2)`-based lock.
    pub struct FlockLock {
        path: PathBuf,
        held: Option<Flock<File>>,
    }

    impl std::fmt::Debug for FlockLock {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FlockLock")
                .field("path", &self.path)
                .field("locked", &self.held.is_some())
                .finish()
        }
    }

    impl FlockLock {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                held: None,
            }
        }

        fn io_error(&self, source: impl Into<std::io::Error>) -> LockError {
            LockError::Io {
                path: self.path.clone(),
                source: source.into(),
            }
        }
    }

    impl FileLock for FlockLock {
        fn try_lock(&mut self) -> Result<bool, LockError> {
            if self.held.is_some() {
                return Err(LockError::IllegalState {
                    path: self.path.clone(),
                    reason: "cannot lock twice",
                });
            }

            let file = open_lock_file(&self.path)?;
            let mut held = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(held) => held,
                // The file is closed along with the returned handle.
                Err((_file, Errno::EWOULDBLOCK)) => return Ok(false),
                Err((_file, errno)) => return Err(self.io_error(errno)),
            };

            rewrite(&mut held, &lock_info()).map_err(|e| self.io_error(e))?;
            tracing::debug!(path = %self.path.display(), "lock acquired");
            self.held = Some(held);
            Ok(true)
        }

        fn release_lock(&mut self) -> Result<(), LockError> {
            let Some(mut held) = self.held.take() else {
                return Err(LockError::IllegalState {
                    path: self.path.clone(),
                    reason: "not locked",
                });
            };

            rewrite(&mut held, "").map_err(|e| self.io_error(e))?;
            held.unlock().map_err(|(_, errno)| self.io_error(errno))?;
            tracing::debug!(path = %self.path.display(), "lock released");
            Ok(())
        }

        fn is_locked(&self) -> bool {
            self.held.is_some()
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }
}

#[cfg(not(unix))]
pub use self::native::NativeLock;

#[cfg(not(unix))]
mod native {
    use std::fs::{File, TryLockError};
    use std::path::{Path, PathBuf};

    use super::{FileLock, LockError, lock_info, open_lock_file, rewrite};

    /// Lock backed by `File::try_lock`.
    #[derive(Debug)]
    pub struct NativeLock {
        path: PathBuf,
        held: Option<File>,
    }

    impl NativeLock {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                held: None,
            }
        }

        fn io_error(&self, source: std::io::Error) -> LockError {
            LockError::Io {
                path: self.path.clone(),
                source,
            }
        }
    }

    impl FileLock for NativeLock {
        fn try_lock(&mut self) -> Result<bool, LockError> {
            if self.held.is_some() {
                return Err(LockError::IllegalState {
                    path: self.path.clone(),
                    reason: "cannot lock twice",
                });
            }

            let mut file = open_lock_file(&self.path)?;
            match file.try_lock() {
                Ok(()) => {}
                Err(TryLockError::WouldBlock) => return Ok(false),
                Err(TryLockError::Error(e)) => return Err(self.io_error(e)),
            }

            rewrite(&mut file, &lock_info()).map_err(|e| self.io_error(e))?;
            tracing::debug!(path = %self.path.display(), "lock acquired");
            self.held = Some(file);
            Ok(true)
        }

        fn release_lock(&mut self) -> Result<(), LockError> {
            let Some(mut file) = self.held.take() else {
                return Err(LockError::IllegalState {
                    path: self.path.clone(),
                    reason: "not locked",
                });
            };

            rewrite(&mut file, "").map_err(|e| self.io_error(e))?;
            file.unlock().map_err(|e| self.io_error(e))?;
            tracing::debug!(path = %self.path.display(), "lock released");
            Ok(())
        }

        fn is_locked(&self) -> bool {
            self.held.is_some()
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }
}
