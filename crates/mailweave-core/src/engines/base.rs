//! Exit-code discipline shared by every engine.

use std::panic::{self, AssertUnwindSafe};

use tracing::{error, info};

use crate::domain::ExitCode;
use crate::message::{Args, Emitter};

/// Bookkeeping of an engine's task loop.
#[derive(Debug)]
pub struct SyncEngine {
    worker: String,
    processed: bool,
    exit_code: ExitCode,
}

impl SyncEngine {
    pub fn new(worker: &str) -> Self {
        Self {
            worker: worker.to_string(),
            processed: false,
            exit_code: ExitCode::BUSY,
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Record that `task` was taken from the queue.
    pub fn processing(&mut self, task: &str) {
        self.processed = true;
        info!(worker = %self.worker, task, "processing");
    }

    /// Only ever raises the latched code.
    pub fn set_exit_code(&mut self, code: ExitCode) {
        self.exit_code.raise(code);
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn fail(&mut self, task: &str, reason: &dyn std::fmt::Display) {
        error!(worker = %self.worker, task, error = %reason, "task failed");
        self.set_exit_code(ExitCode::ERROR);
    }

    /// Final code once the task loop has ended.
    pub fn check_exit_code(&mut self) -> ExitCode {
        if !self.processed {
            self.set_exit_code(ExitCode::SUCCESS);
        } else if !self.exit_code.is_resolved() {
            error!(worker = %self.worker, "tasks processed but no exit code set");
            self.set_exit_code(ExitCode::INTERNAL);
        }
        self.exit_code
    }
}

/// Run an engine body, then send its code to the supervisor as `event`.
///
/// A panicking body reports [`ExitCode::INTERNAL`], so the supervisor is
/// never left waiting.
pub fn run_and_report<F>(worker: &str, supervisor: &Emitter, event: &str, body: F) -> ExitCode
where
    F: FnOnce() -> ExitCode,
{
    let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|_| {
        error!(worker, "engine panicked");
        ExitCode::INTERNAL
    });
    info!(worker, code = code.code(), "engine finished");
    if let Err(e) = Args::one(code).and_then(|args| supervisor.call(event, args)) {
        error!(worker, event, error = %e, "cannot report exit code");
    }
    code
}
