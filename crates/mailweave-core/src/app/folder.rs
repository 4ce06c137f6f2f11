//! Folder-level supervision.
//!
//! A [`SyncFolderArchitect`] runs one folder engine with its own driver pair,
//! or with a pair reused from the account engine. A
//! [`SyncFoldersArchitect`] fans the folders of an account out over several
//! of them sharing one task queue; only the first child may reuse drivers.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use super::architect::Architect;
use super::driver::{DriverPair, DriversArchitect, first_error};
use crate::domain::{ArchitectError, ExitCode, HandlerError};
use crate::engines::{FolderEngine, run_and_report};
use crate::message::{Args, Emitter, Receiver, new_emitter_receiver};
use crate::runtime::Runtime;
use crate::typed::{Channel, Queue};

/// State the folder supervisor's receiver updates.
#[derive(Debug, Default)]
pub struct FolderSupervision {
    exit_code: ExitCode,
    stopped: bool,
    unreadable: Option<String>,
}

fn on_stop(supervision: &mut FolderSupervision, args: Args) -> Result<Value, HandlerError> {
    let code: ExitCode = args.get(0).inspect_err(|e| {
        supervision.unreadable = Some(e.to_string());
    })?;
    supervision.exit_code.raise(code);
    supervision.stopped = true;
    Ok(Value::Null)
}

pub struct SyncFolderArchitect {
    name: String,
    runtime: Arc<Runtime>,
    architect: Architect,
    drivers: Option<DriversArchitect>,
    receiver: Receiver<FolderSupervision>,
    emitter: Emitter,
    supervision: FolderSupervision,
    finished: bool,
}

impl SyncFolderArchitect {
    pub fn new(runtime: Arc<Runtime>, name: &str) -> Result<Self, ArchitectError> {
        let (receiver, emitter) = new_emitter_receiver(runtime.backend(), name)?;
        Ok(Self {
            name: name.to_string(),
            architect: Architect::new(Arc::clone(&runtime), name),
            runtime,
            drivers: None,
            receiver,
            emitter,
            supervision: FolderSupervision::default(),
            finished: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the folder engine of `account` on `tasks`. Without `reuse`,
    /// a fresh driver pair is spawned for this worker.
    pub fn start(
        &mut self,
        tasks: Queue<String>,
        account: &str,
        reuse: Option<DriverPair>,
    ) -> Result<(), ArchitectError> {
        let mut drivers = match reuse {
            Some(pair) => DriversArchitect::reuse(&self.name, pair),
            None => DriversArchitect::new(Arc::clone(&self.runtime), &self.name, 2)?,
        };
        self.receiver.accept("stop", on_stop)?;
        drivers.init()?;
        let started = drivers.start();
        let pair = drivers.pair();
        self.drivers = Some(drivers);
        started?;
        let pair = pair?;

        let runtime = Arc::clone(&self.runtime);
        let worker = self.name.clone();
        let account = account.to_string();
        let supervisor = self.emitter.clone();
        self.architect.start(move || {
            run_and_report(&worker, &supervisor, "stop", || {
                FolderEngine::new(runtime, &worker, &account, pair).run(Channel::new(tasks))
            });
        })
    }

    /// Poll once. Busy until the engine reported `stop`; then the drivers
    /// and the worker are stopped and the latched code is returned.
    pub fn exit_code(&mut self) -> ExitCode {
        if self.finished {
            return self.supervision.exit_code;
        }
        match self.poll() {
            Ok(code) => code,
            Err(e) => {
                error!(architect = %self.name, error = %e, "folder supervision failed");
                if let Err(e) = self.kill() {
                    error!(architect = %self.name, error = %e, "kill failed");
                }
                self.supervision.exit_code.raise(ExitCode::ERROR);
                ExitCode::ERROR
            }
        }
    }

    fn poll(&mut self) -> Result<ExitCode, ArchitectError> {
        self.receiver.react(&mut self.supervision)?;
        if let Some(reason) = self.supervision.unreadable.take() {
            return Err(ArchitectError::BadReport {
                worker: self.name.clone(),
                event: "stop".into(),
                reason,
            });
        }
        if !self.supervision.stopped {
            return Ok(ExitCode::BUSY);
        }
        let drivers = self.drivers.as_mut().map_or(Ok(()), |d| d.stop());
        first_error([drivers, self.architect.stop()])?;
        self.finished = true;
        debug!(architect = %self.name, code = %self.supervision.exit_code, "folder worker done");
        Ok(self.supervision.exit_code)
    }

    pub fn kill(&mut self) -> Result<(), ArchitectError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let drivers = self.drivers.as_mut().map_or(Ok(()), |d| d.kill());
        first_error([drivers, self.architect.kill()])
    }

    /// Give reused drivers back once the worker ended normally. A killed
    /// pair is gone and is never handed back.
    pub fn release_drivers(&mut self) -> Option<DriverPair> {
        if !self.finished {
            return None;
        }
        let drivers = self.drivers.take_if(|d| d.is_reused() && !d.is_killed())?;
        drivers.pair().ok()
    }
}

pub struct SyncFoldersArchitect {
    name: String,
    runtime: Arc<Runtime>,
    children: Vec<SyncFolderArchitect>,
    exit_code: ExitCode,
    returned: Option<DriverPair>,
}

impl SyncFoldersArchitect {
    /// Children are named `<name>.Folder.<i>`.
    pub fn new(runtime: Arc<Runtime>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            runtime,
            children: Vec::new(),
            exit_code: ExitCode::BUSY,
            returned: None,
        }
    }

    /// Queue every folder, then spawn up to `max_workers` folder workers.
    /// The first one gets `reuse`, the others build their own drivers.
    pub fn start(
        &mut self,
        account: &str,
        max_workers: usize,
        folders: &[String],
        reuse: Option<DriverPair>,
    ) -> Result<(), ArchitectError> {
        let tasks = Queue::new(self.runtime.backend())?;
        let queued = tasks.fill(folders)?;
        let workers = max_workers.min(queued).max(1);
        info!(architect = %self.name, account, folders = queued, workers, "syncing folders");

        let mut reuse = reuse;
        for i in 0..workers {
            let mut child = SyncFolderArchitect::new(
                Arc::clone(&self.runtime),
                &format!("{}.Folder.{i}", self.name),
            )?;
            let started = child.start(tasks.clone(), account, reuse.take());
            self.children.push(child);
            started?;
        }
        Ok(())
    }

    /// Poll every remaining child. Busy while any child is running, the
    /// worst child code afterwards.
    pub fn exit_code(&mut self) -> ExitCode {
        let mut code = self.exit_code;
        let mut returned = None;
        self.children.retain_mut(|child| {
            let child_code = child.exit_code();
            if !child_code.is_resolved() {
                return true;
            }
            code.raise(child_code);
            if let Some(pair) = child.release_drivers() {
                returned = Some(pair);
            }
            false
        });
        self.exit_code = code;
        if returned.is_some() {
            self.returned = returned;
        }
        if self.children.is_empty() {
            self.exit_code
        } else {
            ExitCode::BUSY
        }
    }

    /// Drivers reused by the first child, once it has finished.
    pub fn take_returned_drivers(&mut self) -> Option<DriverPair> {
        self.returned.take()
    }

    pub fn kill(&mut self) -> Result<(), ArchitectError> {
        self.exit_code.raise(ExitCode::ERROR);
        first_error(self.children.drain(..).map(|mut child| child.kill()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::architect::tests::runtime_on;
    use crate::app::engine::EngineArchitect;
    use crate::config::Config;
    use crate::impls::ThreadBackend;
    use crate::impls::drivers::MemoryDriverFactory;
    use std::time::Duration;

    const TWO_FOLDERS: &str = r#"
        [[accounts]]
        name = "A"
        left = "left"
        right = "right"

        [repositories.left]
        driver = "memory"
        max_connections = 2
        folders = { INBOX = ["hello"], "INBOX/sent" = ["re: hello", "fwd: hello"] }

        [repositories.right]
        driver = "memory"
        max_connections = 2
    "#;

    fn folders() -> Vec<String> {
        vec!["INBOX".to_string(), "INBOX/sent".to_string()]
    }

    fn wait(architect: &mut SyncFoldersArchitect) -> ExitCode {
        loop {
            let code = architect.exit_code();
            if code.is_resolved() {
                return code;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn two_workers_sync_two_folders() {
        let memory = Arc::new(MemoryDriverFactory::new());
        let runtime = Arc::new(
            Runtime::with_builtins(
                Arc::new(ThreadBackend),
                Config::from_toml(TWO_FOLDERS).unwrap(),
                Arc::clone(&memory),
            )
            .unwrap(),
        );
        let mut folders_architect = SyncFoldersArchitect::new(runtime, "Account.0");
        folders_architect.start("A", 2, &folders(), None).unwrap();
        assert_eq!(folders_architect.children.len(), 2);
        assert_eq!(folders_architect.children[1].name(), "Account.0.Folder.1");

        assert_eq!(wait(&mut folders_architect), ExitCode::SUCCESS);
        assert!(folders_architect.children.is_empty());
        assert!(folders_architect.take_returned_drivers().is_none());

        let right = memory.snapshot("right").unwrap();
        assert_eq!(right.message_ids("INBOX"), vec!["1"]);
        assert_eq!(right.message_ids("INBOX/sent"), vec!["1", "2"]);
    }

    #[test]
    fn workers_never_outnumber_folders() {
        let runtime = runtime_on(Arc::new(ThreadBackend), TWO_FOLDERS);
        let mut folders_architect = SyncFoldersArchitect::new(runtime, "Account.0");
        folders_architect.start("A", 8, &folders(), None).unwrap();
        assert_eq!(folders_architect.children.len(), 2);
        assert_eq!(wait(&mut folders_architect), ExitCode::SUCCESS);
    }

    #[test]
    fn reused_drivers_come_back_from_the_first_worker() {
        let runtime = runtime_on(Arc::new(ThreadBackend), TWO_FOLDERS);
        let mut engine = EngineArchitect::new(Arc::clone(&runtime), "Account.0").unwrap();
        engine.start(|_, _| {}).unwrap();
        let pair = engine.lend_drivers().unwrap();

        let mut folders_architect = SyncFoldersArchitect::new(runtime, "Account.0");
        folders_architect.start("A", 2, &folders(), Some(pair)).unwrap();
        assert_eq!(wait(&mut folders_architect), ExitCode::SUCCESS);

        let returned = folders_architect.take_returned_drivers().unwrap();
        assert_eq!(returned.left.worker(), "Account.0.Driver.0");
        engine.return_drivers(returned).unwrap();
        // The reused loop survived the folder worker.
        assert_eq!(engine.left_emitter().unwrap().class_name().unwrap(), "MemoryDriver");
        engine.stop().unwrap();
    }

    #[test]
    fn busy_until_every_worker_reported() {
        let runtime = runtime_on(Arc::new(ThreadBackend), TWO_FOLDERS);
        let early = Queue::new(runtime.backend()).unwrap();
        let late = Queue::new(runtime.backend()).unwrap();
        early.fill(&["INBOX".to_string()]).unwrap();

        let mut folders_architect = SyncFoldersArchitect::new(Arc::clone(&runtime), "Account.0");
        for (i, tasks) in [early, late.clone()].into_iter().enumerate() {
            let mut child =
                SyncFolderArchitect::new(Arc::clone(&runtime), &format!("Account.0.Folder.{i}")).unwrap();
            child.start(tasks, "A", None).unwrap();
            folders_architect.children.push(child);
        }

        // The second worker waits on its queue, so the first one ends alone.
        while folders_architect.children.len() == 2 {
            assert_eq!(folders_architect.exit_code(), ExitCode::BUSY);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(folders_architect.children[0].name(), "Account.0.Folder.1");
        assert_eq!(folders_architect.exit_code(), ExitCode::BUSY);

        late.fill(&["INBOX/sent".to_string()]).unwrap();
        assert_eq!(wait(&mut folders_architect), ExitCode::SUCCESS);
    }

    #[test]
    fn unreadable_stop_kills_the_worker() {
        let runtime = runtime_on(Arc::new(ThreadBackend), TWO_FOLDERS);
        let mut folder = SyncFolderArchitect::new(Arc::clone(&runtime), "Account.0.Folder.0").unwrap();
        let tasks = Queue::new(runtime.backend()).unwrap();
        folder.start(tasks.clone(), "A", None).unwrap();

        folder
            .emitter
            .call("stop", Args::one("not a code").unwrap())
            .unwrap();
        assert_eq!(folder.exit_code(), ExitCode::ERROR);
        assert!(folder.finished);
        assert!(folder.architect.is_killed());
        assert!(folder.drivers.as_ref().unwrap().is_killed());
        assert_eq!(folder.exit_code(), ExitCode::ERROR);
        assert!(folder.release_drivers().is_none());

        // Killed thread workers are only detached; let the engine end.
        tasks.close().unwrap();
    }

    #[test]
    fn failing_folder_worker_reports_error() {
        let runtime = runtime_on(Arc::new(ThreadBackend), TWO_FOLDERS);
        let mut folder = SyncFolderArchitect::new(runtime, "Account.0.Folder.0").unwrap();
        let tasks = Queue::new(folder.runtime.backend()).unwrap();
        tasks.fill(&["Nowhere".to_string()]).unwrap();
        folder.start(tasks, "B", None).unwrap();

        let code = loop {
            let code = folder.exit_code();
            if code.is_resolved() {
                break code;
            }
        };
        // "B" is not an account: the folder fails, the worker still ends.
        assert_eq!(code, ExitCode::ERROR);
        assert_eq!(folder.exit_code(), ExitCode::ERROR);
        assert!(folder.release_drivers().is_none());
    }
}
