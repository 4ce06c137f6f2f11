//! ConcurrencyBackend port - workers, queues and locks.
//!
//! Everything above this port (message layer, architects, engines) is
//! written once and runs unchanged on threads or on forked processes. The
//! backend is chosen per run and handed around inside the `Runtime`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::BackendError;

/// Entry point of a worker. Runs exactly once, for the worker's lifetime.
pub type WorkerEntry = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Threads,
    Processes,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Threads => f.write_str("threads"),
            BackendKind::Processes => f.write_str("processes"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threads" | "thread" => Ok(BackendKind::Threads),
            "processes" | "process" => Ok(BackendKind::Processes),
            other => Err(format!("unknown concurrency backend {other:?}")),
        }
    }
}

/// How a worker ended, as observed by `join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Entry point returned; the value is the process exit status (0 for threads).
    Exited(i32),
    /// Entry point panicked.
    Panicked,
    /// Terminated by a signal.
    Killed,
}

/// One unit of execution: a thread or a process.
pub trait Worker: Send {
    fn name(&self) -> &str;

    /// Spawn the unit and run the entry point in it.
    fn start(&mut self) -> Result<(), BackendError>;

    /// Block until the unit terminates on its own.
    fn join(&mut self) -> Result<WorkerStatus, BackendError>;

    /// Forced termination. Processes get `SIGTERM`; threads cannot be
    /// pre-empted, so a killed thread is detached and left to die with
    /// the process.
    fn kill(&mut self) -> Result<(), BackendError>;
}

/// FIFO of JSON text frames, safe for many producers and consumers.
///
/// Closing is the "population complete" latch: once closed and drained,
/// `get` returns `None` instead of waiting.
pub trait RawQueue: Send + Sync + fmt::Debug {
    fn put(&self, frame: String) -> Result<(), BackendError>;

    /// Pop without waiting.
    fn get_nowait(&self) -> Result<Option<String>, BackendError>;

    /// Pop, waiting for an item; `None` once closed and empty.
    fn get(&self) -> Result<Option<String>, BackendError>;

    fn is_empty(&self) -> Result<bool, BackendError>;

    fn close(&self) -> Result<(), BackendError>;
}

/// Anything that must stay alive while a lock is held.
pub trait Held {}

impl<T> Held for T {}

/// Proof of a held [`Lock`]; released on drop.
pub struct LockGuard<'a> {
    _held: Box<dyn Held + 'a>,
}

impl<'a> LockGuard<'a> {
    pub fn new(held: impl Held + 'a) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

/// Mutual exclusion shared by every worker of a run (the log sink uses it).
pub trait Lock: Send + Sync {
    fn acquire(&self) -> Result<LockGuard<'_>, BackendError>;
}

/// Factory for the three primitives.
pub trait ConcurrencyBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Create an unstarted worker.
    fn create_worker(&self, name: &str, entry: WorkerEntry) -> Box<dyn Worker>;

    fn create_queue(&self) -> Result<Arc<dyn RawQueue>, BackendError>;

    fn create_lock(&self) -> Result<Arc<dyn Lock>, BackendError>;
}
