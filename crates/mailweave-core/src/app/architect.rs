//! Architect - supervises exactly one worker.
//!
//! ```text
//! Idle --start--> Running --stop--> Stopped
//!                    |
//!                    +----kill--> Killed
//! ```
//!
//! `Stopped` and `Killed` are terminal: stopping or killing again is a
//! no-op, starting again is an error.

use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::domain::ArchitectError;
use crate::ports::{Worker, WorkerStatus};
use crate::runtime::Runtime;

enum ArchitectState {
    Idle,
    Running(Box<dyn Worker>),
    Stopped,
    Killed,
}

pub struct Architect {
    name: String,
    runtime: Arc<Runtime>,
    state: ArchitectState,
}

impl Architect {
    pub fn new(runtime: Arc<Runtime>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime,
            state: ArchitectState::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ArchitectState::Running(_))
    }

    pub fn is_killed(&self) -> bool {
        matches!(self.state, ArchitectState::Killed)
    }

    /// Spawn the worker running `entry`.
    pub fn start<F>(&mut self, entry: F) -> Result<(), ArchitectError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !matches!(self.state, ArchitectState::Idle) {
            return Err(ArchitectError::AlreadyStarted(self.name.clone()));
        }
        let name = self.name.clone();
        let mut worker = self.runtime.backend().create_worker(
            &self.name,
            Box::new(move || {
                let span = info_span!("worker", name = %name);
                let _entered = span.enter();
                entry();
            }),
        );
        worker.start()?;
        info!(worker = %self.name, "worker started");
        self.state = ArchitectState::Running(worker);
        Ok(())
    }

    /// Wait for the worker to end on its own.
    pub fn stop(&mut self) -> Result<(), ArchitectError> {
        let mut worker = match std::mem::replace(&mut self.state, ArchitectState::Stopped) {
            ArchitectState::Running(worker) => worker,
            ArchitectState::Idle => {
                self.state = ArchitectState::Idle;
                return Err(ArchitectError::NotStarted(self.name.clone()));
            }
            terminal => {
                self.state = terminal;
                return Ok(());
            }
        };
        match worker.join()? {
            WorkerStatus::Exited(0) => info!(worker = %self.name, "worker stopped"),
            status => warn!(worker = %self.name, ?status, "worker ended abnormally"),
        }
        Ok(())
    }

    /// Terminate the worker without waiting for it.
    pub fn kill(&mut self) -> Result<(), ArchitectError> {
        let mut worker = match std::mem::replace(&mut self.state, ArchitectState::Killed) {
            ArchitectState::Running(worker) => worker,
            ArchitectState::Idle => {
                self.state = ArchitectState::Idle;
                return Err(ArchitectError::NotStarted(self.name.clone()));
            }
            terminal => {
                self.state = terminal;
                return Ok(());
            }
        };
        warn!(worker = %self.name, "killing worker");
        worker.kill()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::impls::ThreadBackend;
    use crate::impls::drivers::MemoryDriverFactory;
    use crate::ports::ConcurrencyBackend;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) const ONE_ACCOUNT: &str = r#"
        [[accounts]]
        name = "A"
        left = "left"
        right = "right"

        [repositories.left]
        driver = "memory"

        [repositories.right]
        driver = "memory"
    "#;

    pub(crate) fn runtime_on(backend: Arc<dyn ConcurrencyBackend>, toml: &str) -> Arc<Runtime> {
        let config = Config::from_toml(toml).unwrap();
        Arc::new(Runtime::with_builtins(backend, config, Arc::new(MemoryDriverFactory::new())).unwrap())
    }

    pub(crate) fn runtime() -> Arc<Runtime> {
        runtime_on(Arc::new(ThreadBackend), ONE_ACCOUNT)
    }

    #[test]
    fn start_then_stop_runs_entry() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let mut architect = Architect::new(runtime(), "Test");
        architect.start(move || flag.store(true, Ordering::SeqCst)).unwrap();
        assert!(architect.is_running());
        architect.stop().unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert!(!architect.is_running());
    }

    #[test]
    fn cannot_start_twice() {
        let mut architect = Architect::new(runtime(), "Test");
        architect.start(|| {}).unwrap();
        assert!(matches!(architect.start(|| {}), Err(ArchitectError::AlreadyStarted(_))));
        architect.stop().unwrap();
        assert!(matches!(architect.start(|| {}), Err(ArchitectError::AlreadyStarted(_))));
    }

    #[test]
    fn stop_or_kill_before_start_is_an_error() {
        let mut architect = Architect::new(runtime(), "Test");
        assert!(matches!(architect.stop(), Err(ArchitectError::NotStarted(_))));
        assert!(matches!(architect.kill(), Err(ArchitectError::NotStarted(_))));
        architect.start(|| {}).unwrap();
        architect.stop().unwrap();
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut architect = Architect::new(runtime(), "Test");
        architect.start(|| {}).unwrap();
        architect.kill().unwrap();
        assert!(architect.is_killed());
        architect.stop().unwrap();
        architect.kill().unwrap();
        assert!(architect.is_killed());
    }
}
