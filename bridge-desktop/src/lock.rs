//! Advisory file locks backed by `flock`/`LockFileEx` via fs4.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    lock::{FileLocker, LockRelease, ScopedFileLock},
};
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Open file holding a shared lock until released.
struct SharedFileLock {
    file: File,
}

impl LockRelease for SharedFileLock {
    fn release(self: Box<Self>) -> Result<()> {
        fs4::fs_std::FileExt::unlock(&self.file).map_err(BridgeError::Io)
    }
}

/// Locker that takes OS-level advisory locks.
///
/// Blocking lock calls run on the blocking thread pool.
#[derive(Debug, Clone, Default)]
pub struct Fs4FileLocker;

impl Fs4FileLocker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileLocker for Fs4FileLocker {
    async fn lock_shared(&self, path: &Path) -> Result<ScopedFileLock> {
        let owned = path.to_path_buf();
        let lock_path = owned.clone();

        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = File::open(&lock_path)?;
            fs4::fs_std::FileExt::lock_shared(&file).map_err(|e| BridgeError::LockFailed {
                path: lock_path.display().to_string(),
                message: e.to_string(),
            })?;
            Ok(file)
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Lock task failed: {}", e)))??;

        debug!(path = %owned.display(), "Acquired shared lock");
        Ok(ScopedFileLock::new(owned, Box::new(SharedFileLock { file })))
    }
}
