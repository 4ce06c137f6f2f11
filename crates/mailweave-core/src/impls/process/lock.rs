//! File lock shared by every process of a run.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::domain::BackendError;
use crate::ports::{Lock, LockGuard};

/// `flock` on a lock file. Each acquisition opens its own file description,
/// so the lock excludes threads of the same process as well as other
/// processes (flock is per open description, not per process).
#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        Ok(Self { path })
    }
}

impl Lock for ProcessLock {
    fn acquire(&self) -> Result<LockGuard<'_>, BackendError> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        let lock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| errno)?;
        Ok(LockGuard::new(lock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_cannot_take_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProcessLock::new(dir.path().join("log.lock")).unwrap();
        let guard = lock.acquire().unwrap();

        let other = OpenOptions::new()
            .write(true)
            .open(dir.path().join("log.lock"))
            .unwrap();
        assert!(Flock::lock(other, FlockArg::LockExclusiveNonblock).is_err());

        drop(guard);
        let other = OpenOptions::new()
            .write(true)
            .open(dir.path().join("log.lock"))
            .unwrap();
        assert!(Flock::lock(other, FlockArg::LockExclusiveNonblock).is_ok());
    }
}
