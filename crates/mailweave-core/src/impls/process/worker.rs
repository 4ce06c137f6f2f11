//! Forked worker processes.

use std::panic::{self, AssertUnwindSafe};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, error, warn};

use crate::domain::BackendError;
use crate::ports::{Worker, WorkerEntry, WorkerStatus};

/// Exit status of a child whose entry point panicked.
const PANIC_STATUS: i32 = 101;

enum ProcessState {
    Ready(WorkerEntry),
    Running(Pid),
    Done,
}

pub struct ProcessWorker {
    name: String,
    state: ProcessState,
}

impl ProcessWorker {
    pub fn new(name: &str, entry: WorkerEntry) -> Self {
        Self {
            name: name.to_string(),
            state: ProcessState::Ready(entry),
        }
    }

    fn not_started(&mut self, previous: ProcessState) -> BackendError {
        self.state = previous;
        BackendError::NotStarted(self.name.clone())
    }
}

impl Worker for ProcessWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), BackendError> {
        let entry = match std::mem::replace(&mut self.state, ProcessState::Done) {
            ProcessState::Ready(entry) => entry,
            other => {
                self.state = other;
                return Err(BackendError::AlreadyStarted(self.name.clone()));
            }
        };

        // SAFETY: the child only runs the worker entry and then exits without
        // returning into the caller's stack; it never touches state owned by
        // other threads of the parent.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                debug!(worker = %self.name, pid = child.as_raw(), "process started");
                self.state = ProcessState::Running(child);
                Ok(())
            }
            ForkResult::Child => {
                let status = match panic::catch_unwind(AssertUnwindSafe(entry)) {
                    Ok(()) => 0,
                    Err(_) => {
                        error!(worker = %self.name, "worker process panicked");
                        PANIC_STATUS
                    }
                };
                std::process::exit(status);
            }
        }
    }

    fn join(&mut self) -> Result<WorkerStatus, BackendError> {
        let pid = match std::mem::replace(&mut self.state, ProcessState::Done) {
            ProcessState::Running(pid) => pid,
            other => return Err(self.not_started(other)),
        };
        loop {
            match waitpid(pid, None)? {
                WaitStatus::Exited(_, PANIC_STATUS) => return Ok(WorkerStatus::Panicked),
                WaitStatus::Exited(_, status) => return Ok(WorkerStatus::Exited(status)),
                WaitStatus::Signaled(_, signal, _) => {
                    debug!(worker = %self.name, signal = ?signal, "process terminated by signal");
                    return Ok(WorkerStatus::Killed);
                }
                // Stopped/continued children are still alive.
                _ => continue,
            }
        }
    }

    fn kill(&mut self) -> Result<(), BackendError> {
        let pid = match std::mem::replace(&mut self.state, ProcessState::Done) {
            ProcessState::Running(pid) => pid,
            ProcessState::Done => return Ok(()),
            other => return Err(self.not_started(other)),
        };
        signal::kill(pid, Signal::SIGTERM)?;
        // Reap if it is already gone; otherwise leave it, kill does not wait.
        if let Err(e) = waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            warn!(worker = %self.name, error = %e, "cannot reap killed process");
        }
        debug!(worker = %self.name, pid = pid.as_raw(), "process killed");
        Ok(())
    }
}
