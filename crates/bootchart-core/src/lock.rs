//! Cross-process serialization of dumps. A manual `stop` can race the
//! detector's own archive step; only one may drive the collector at a time.

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::info;

use crate::error::ArchiveError;

/// Exclusive hold on the dump lock file, released on drop.
pub struct DumpLock {
    _flock: Flock<File>,
}

impl DumpLock {
    /// Wait (on a blocking thread) until no other dump holds the lock.
    pub async fn acquire(path: PathBuf) -> Result<Self, ArchiveError> {
        let task_path = path.clone();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(&task_path))
            .await
            .map_err(|e| lock_error(&path, format!("lock task: {e}")))?
    }

    fn acquire_blocking(path: &Path) -> Result<Self, ArchiveError> {
        let file = open_lock_file(path)?;
        let file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => return Ok(Self { _flock: flock }),
            Err((file, Errno::EWOULDBLOCK)) => {
                info!(path = %path.display(), "another dump in progress, waiting");
                file
            }
            Err((_, e)) => return Err(lock_error(path, format!("flock: {e}"))),
        };
        let flock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, e)| lock_error(path, format!("flock: {e}")))?;
        Ok(Self { _flock: flock })
    }
}

fn lock_error(path: &Path, detail: impl Into<String>) -> ArchiveError {
    ArchiveError::Lock {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

fn open_lock_file(path: &Path) -> Result<File, ArchiveError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| lock_error(path, format!("create {}: {e}", parent.display())))?;
    }
    File::options()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| lock_error(path, format!("open: {e}")))
}
