//! ProcessBackend - workers are forked child processes.
//!
//! # Layout
//! - **worker**: `fork` / `waitpid` / `SIGTERM`
//! - **broker**: per-process queue broker on a Unix socket
//! - **lock**: `flock` on a lock file in the backend's runtime directory
//!
//! Queues created by a process are served by that process's broker; a forked
//! child inherits the socket path and talks to the same broker, so a queue
//! created before a fork is shared by parent and child. A child that creates
//! queues of its own gets a broker of its own (the parent's broker thread
//! does not survive the fork).

mod broker;
mod lock;
mod worker;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::TempDir;
use tracing::debug;

use crate::domain::{BackendError, BrokerId};
use crate::ports::{BackendKind, ConcurrencyBackend, Lock, RawQueue, Worker, WorkerEntry};

pub use self::broker::ProcessQueue;
pub use self::lock::ProcessLock;
pub use self::worker::ProcessWorker;

use self::broker::Broker;

pub struct ProcessBackend {
    runtime_dir: TempDir,
    lock: Arc<ProcessLock>,
    broker: Mutex<Option<Broker>>,
}

impl ProcessBackend {
    pub fn new() -> Result<Self, BackendError> {
        let runtime_dir = tempfile::Builder::new().prefix("mailweave-").tempdir()?;
        let lock = Arc::new(ProcessLock::new(runtime_dir.path().join("log.lock"))?);
        debug!(dir = %runtime_dir.path().display(), "process backend ready");
        Ok(Self {
            runtime_dir,
            lock,
            broker: Mutex::new(None),
        })
    }

    fn socket_path(&self) -> PathBuf {
        self.runtime_dir
            .path()
            .join(format!("broker-{}-{}.sock", std::process::id(), BrokerId::generate()))
    }
}

impl std::fmt::Debug for ProcessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBackend")
            .field("runtime_dir", &self.runtime_dir.path())
            .finish()
    }
}

impl ConcurrencyBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Processes
    }

    fn create_worker(&self, name: &str, entry: WorkerEntry) -> Box<dyn Worker> {
        Box::new(ProcessWorker::new(name, entry))
    }

    fn create_queue(&self) -> Result<Arc<dyn RawQueue>, BackendError> {
        let mut guard = self.broker.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.as_ref().is_some_and(Broker::is_local) {
            *guard = Some(Broker::spawn(self.socket_path())?);
        }
        match guard.as_ref() {
            Some(broker) => Ok(Arc::new(broker.create_queue()?)),
            None => Err(BackendError::Protocol("queue broker unavailable".into())),
        }
    }

    fn create_lock(&self) -> Result<Arc<dyn Lock>, BackendError> {
        Ok(self.lock.clone())
    }
}
