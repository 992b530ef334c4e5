//! Advisory file locking.
//!
//! The upload pipeline holds a shared lock on a file while it hashes and
//! transfers it, so a writer in another process that takes an exclusive lock
//! cannot change the bytes mid-upload.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Platform handle that knows how to give a lock back.
pub trait LockRelease: Send {
    fn release(self: Box<Self>) -> Result<()>;
}

/// Guard for an acquired advisory lock.
///
/// The lock is released by [`ScopedFileLock::release`] or, failing that, when
/// the guard is dropped. Either way it is released exactly once.
pub struct ScopedFileLock {
    path: PathBuf,
    handle: Option<Box<dyn LockRelease>>,
}

impl ScopedFileLock {
    pub fn new(path: impl Into<PathBuf>, handle: Box<dyn LockRelease>) -> Self {
        Self {
            path: path.into(),
            handle: Some(handle),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and report any failure to do so.
    pub fn release(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.release(),
            None => Ok(()),
        }
    }
}

impl Drop for ScopedFileLock {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.release();
        }
    }
}

impl fmt::Debug for ScopedFileLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedFileLock")
            .field("path", &self.path)
            .field("held", &self.handle.is_some())
            .finish()
    }
}

/// Acquires advisory locks on local files.
#[async_trait]
pub trait FileLocker: Send + Sync {
    /// Acquire a shared (read) lock, waiting while an exclusive holder exists.
    async fn lock_shared(&self, path: &Path) -> Result<ScopedFileLock>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRelease(Arc<AtomicUsize>);

    impl LockRelease for CountingRelease {
        fn release(self: Box<Self>) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_explicit_release_runs_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let lock = ScopedFileLock::new(
            "/tmp/a.png",
            Box::new(CountingRelease(Arc::clone(&released))),
        );

        assert_eq!(lock.path(), Path::new("/tmp/a.png"));
        lock.release().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        {
            let _lock = ScopedFileLock::new(
                "/tmp/b.png",
                Box::new(CountingRelease(Arc::clone(&released))),
            );
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
