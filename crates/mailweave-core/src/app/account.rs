//! Account-level supervision, the top of the tree.
//!
//! ```text
//! SyncAccountsArchitect
//!  └── SyncArchitect "Account.<i>"
//!       ├── EngineArchitect: account engine + Driver.0/Driver.1
//!       └── SyncFoldersArchitect: Folder.<j> (+ their own drivers)
//! ```
//!
//! The account engine asks for its folders with `sync_folders`; the
//! supervisor lends the engine's driver pair to the first folder worker,
//! takes it back when the folders are done and answers `folders_done` on
//! the engine's inbox. `account_engine_done` ends the account slot.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use super::driver::{DriverPair, first_error};
use super::engine::EngineArchitect;
use super::folder::SyncFoldersArchitect;
use crate::domain::{ArchitectError, ExitCode, HandlerError};
use crate::engines::{AccountEngine, FoldersDone, accept_folders_done, run_and_report};
use crate::message::{Args, Emitter, Receiver, new_emitter_receiver};
use crate::runtime::Runtime;
use crate::typed::{Channel, Queue};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct FolderRequest {
    account: String,
    max_workers: usize,
    folders: Vec<String>,
}

/// State the account supervisor's receiver updates.
#[derive(Debug, Default)]
pub struct AccountSupervision {
    engine_code: ExitCode,
    engine_done: bool,
    requests: VecDeque<FolderRequest>,
    unreadable: Option<String>,
}

fn on_engine_done(supervision: &mut AccountSupervision, args: Args) -> Result<Value, HandlerError> {
    let code: ExitCode = args.get(0).inspect_err(|e| {
        supervision.unreadable = Some(e.to_string());
    })?;
    supervision.engine_code.raise(code);
    supervision.engine_done = true;
    Ok(Value::Null)
}

fn on_sync_folders(supervision: &mut AccountSupervision, args: Args) -> Result<Value, HandlerError> {
    supervision.requests.push_back(FolderRequest {
        account: args.get(0)?,
        max_workers: args.get(1)?,
        folders: args.get(2)?,
    });
    Ok(Value::Null)
}

/// Supervises one account slot: its engine and, while an account's
/// folders are synced, their folder workers.
pub struct SyncArchitect {
    name: String,
    runtime: Arc<Runtime>,
    engine: EngineArchitect,
    receiver: Receiver<AccountSupervision>,
    emitter: Emitter,
    inbox: Option<Receiver<FoldersDone>>,
    folders_done: Emitter,
    folders: Option<SyncFoldersArchitect>,
    folders_code: ExitCode,
    supervision: AccountSupervision,
    finished: Option<ExitCode>,
}

impl SyncArchitect {
    pub fn new(runtime: Arc<Runtime>, name: &str) -> Result<Self, ArchitectError> {
        let (mut receiver, emitter) = new_emitter_receiver(runtime.backend(), name)?;
        receiver.accept("account_engine_done", on_engine_done)?;
        receiver.accept("sync_folders", on_sync_folders)?;
        let (mut inbox, folders_done) =
            new_emitter_receiver(runtime.backend(), &format!("{name}.Engine"))?;
        accept_folders_done(&mut inbox)?;
        Ok(Self {
            name: name.to_string(),
            engine: EngineArchitect::new(Arc::clone(&runtime), name)?,
            runtime,
            receiver,
            emitter,
            inbox: Some(inbox),
            folders_done,
            folders: None,
            folders_code: ExitCode::BUSY,
            supervision: AccountSupervision::default(),
            finished: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the account engine on the shared account queue.
    pub fn start(&mut self, tasks: Queue<String>) -> Result<(), ArchitectError> {
        let inbox = self
            .inbox
            .take()
            .ok_or_else(|| ArchitectError::AlreadyStarted(self.name.clone()))?;
        let runtime = Arc::clone(&self.runtime);
        let worker = format!("{}.Engine", self.name);
        let supervisor = self.emitter.clone();
        self.engine.start(move |left, right| {
            run_and_report(&worker, &supervisor, "account_engine_done", || {
                let drivers = DriverPair { left, right };
                AccountEngine::new(runtime, &worker, drivers, supervisor.clone(), inbox)
                    .run(Channel::new(tasks))
            });
        })
    }

    /// Poll once; busy until the engine is done and no folder work is left.
    /// Any supervision failure kills the whole slot and reports an error.
    pub fn exit_code(&mut self) -> ExitCode {
        if let Some(code) = self.finished {
            return code;
        }
        match self.poll() {
            Ok(code) => code,
            Err(e) => {
                error!(architect = %self.name, error = %e, "account supervision failed");
                self.kill_all();
                self.finished = Some(ExitCode::ERROR);
                ExitCode::ERROR
            }
        }
    }

    fn poll(&mut self) -> Result<ExitCode, ArchitectError> {
        self.receiver.react(&mut self.supervision)?;
        if let Some(reason) = self.supervision.unreadable.take() {
            return Err(ArchitectError::BadReport {
                worker: format!("{}.Engine", self.name),
                event: "account_engine_done".into(),
                reason,
            });
        }

        if self.folders.is_none() {
            if let Some(request) = self.supervision.requests.pop_front() {
                self.start_folders(request)?;
            }
        }
        if let Some(folders) = self.folders.as_mut() {
            let code = folders.exit_code();
            if code.is_resolved() {
                self.finish_folders(code)?;
            }
        }

        let idle = self.folders.is_none() && self.supervision.requests.is_empty();
        if !(self.supervision.engine_done && idle) {
            return Ok(ExitCode::BUSY);
        }
        self.engine.stop()?;
        let code = self.supervision.engine_code.aggregate(self.folders_code);
        info!(architect = %self.name, %code, "account slot done");
        self.finished = Some(code);
        Ok(code)
    }

    fn start_folders(&mut self, request: FolderRequest) -> Result<(), ArchitectError> {
        let pair = self.engine.lend_drivers()?;
        let mut folders = SyncFoldersArchitect::new(Arc::clone(&self.runtime), &self.name);
        let started = folders.start(
            &request.account,
            request.max_workers,
            &request.folders,
            Some(pair),
        );
        self.folders = Some(folders);
        started
    }

    /// Take the lent drivers back, then let the engine go on.
    fn finish_folders(&mut self, code: ExitCode) -> Result<(), ArchitectError> {
        let mut folders = self.folders.take();
        self.folders_code.raise(code);
        let returned = folders.as_mut().and_then(|f| f.take_returned_drivers());
        match returned {
            Some(pair) => self.engine.return_drivers(pair)?,
            None => return Err(ArchitectError::DriversLost(self.name.clone())),
        }
        self.folders_done.call("folders_done", Args::one(code)?)?;
        Ok(())
    }

    /// Kill folder workers, then the engine and its drivers.
    pub fn kill(&mut self) -> Result<(), ArchitectError> {
        // Unblocks an engine waiting for `folders_done`.
        if let Err(e) = self.folders_done.stop_serving() {
            warn!(architect = %self.name, error = %e, "engine inbox not closed");
        }
        let folders = self.folders.as_mut().map_or(Ok(()), |f| f.kill());
        self.folders = None;
        first_error([folders, self.engine.kill()])
    }

    fn kill_all(&mut self) {
        if let Err(e) = self.kill() {
            error!(architect = %self.name, error = %e, "kill failed");
        }
    }
}

/// Top-level supervisor: `max_sync_accounts` account slots sharing one
/// account queue.
pub struct SyncAccountsArchitect {
    runtime: Arc<Runtime>,
    accounts: Vec<SyncArchitect>,
}

impl SyncAccountsArchitect {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            accounts: Vec::new(),
        }
    }

    /// Queue every configured account, then start up to `max_accounts` slots.
    pub fn start(&mut self, max_accounts: usize) -> Result<(), ArchitectError> {
        let tasks = Queue::new(self.runtime.backend())?;
        let queued = tasks.fill(&self.runtime.config().account_names())?;
        let slots = max_accounts.min(queued).max(1);
        info!(accounts = queued, slots, "starting account slots");

        for i in 0..slots {
            let mut account = SyncArchitect::new(Arc::clone(&self.runtime), &format!("Account.{i}"))?;
            let started = account.start(tasks.clone());
            self.accounts.push(account);
            started?;
        }
        Ok(())
    }

    /// Poll every slot until all are done; the worst code wins.
    pub fn run(&mut self) -> ExitCode {
        let mut code = ExitCode::BUSY;
        while !self.accounts.is_empty() {
            self.accounts.retain_mut(|account| {
                let account_code = account.exit_code();
                if account_code.is_resolved() {
                    code.raise(account_code);
                }
                !account_code.is_resolved()
            });
            if !self.accounts.is_empty() {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
        if !code.is_resolved() {
            error!("no account slot reported an exit code");
            return ExitCode::INTERNAL;
        }
        info!(%code, "all accounts done");
        code
    }

    pub fn kill(&mut self) -> Result<(), ArchitectError> {
        first_error(self.accounts.drain(..).map(|mut account| account.kill()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::impls::drivers::MemoryDriverFactory;
    use crate::impls::{ProcessBackend, ThreadBackend};
    use std::fs;
    use std::path::Path;

    const THREE_ACCOUNTS: &str = r#"
        max_sync_accounts = 2

        [[accounts]]
        name = "A"
        left = "a-left"
        right = "a-right"

        [[accounts]]
        name = "B"
        left = "b-left"
        right = "b-right"

        [[accounts]]
        name = "C"
        left = "c-left"
        right = "c-right"

        [repositories.a-left]
        driver = "memory"
        max_connections = 2
        folders = { INBOX = ["a1", "a2"], "INBOX/sent" = ["a3"] }

        [repositories.a-right]
        driver = "memory"
        max_connections = 2

        # No path: the driver cannot be built.
        [repositories.b-left]
        driver = "maildir"

        [repositories.b-right]
        driver = "memory"

        [repositories.c-left]
        driver = "memory"
        folders = { Archive = ["c1"] }

        [repositories.c-right]
        driver = "memory"
        folders = { Archive = ["c1"], Drafts = [] }
    "#;

    fn runtime(toml: &str) -> (Arc<Runtime>, Arc<MemoryDriverFactory>) {
        let memory = Arc::new(MemoryDriverFactory::new());
        let runtime = Runtime::with_builtins(
            Arc::new(ThreadBackend),
            Config::from_toml(toml).unwrap(),
            Arc::clone(&memory),
        )
        .unwrap();
        (Arc::new(runtime), memory)
    }

    #[test]
    fn worst_account_wins() {
        let (runtime, memory) = runtime(THREE_ACCOUNTS);
        let mut accounts = SyncAccountsArchitect::new(Arc::clone(&runtime));
        accounts.start(runtime.config().max_sync_accounts).unwrap();
        assert_eq!(accounts.accounts.len(), 2);
        assert_eq!(accounts.accounts[1].name(), "Account.1");

        assert_eq!(accounts.run(), ExitCode::ERROR);

        let a = memory.snapshot("a-right").unwrap();
        assert_eq!(a.message_ids("INBOX"), vec!["1", "2"]);
        assert_eq!(a.message_ids("INBOX/sent"), vec!["1"]);
        let c = memory.snapshot("c-right").unwrap();
        assert_eq!(c.message_ids("Archive"), vec!["1"]);
        // Folders missing on the left are skipped, not created there.
        assert!(memory.snapshot("c-left").unwrap().folders.get("Drafts").is_none());
    }

    #[test]
    fn healthy_accounts_succeed() {
        let healthy = THREE_ACCOUNTS.replace(r#"driver = "maildir""#, r#"driver = "memory""#);
        let (runtime, _) = runtime(&healthy);
        let mut accounts = SyncAccountsArchitect::new(runtime);
        accounts.start(3).unwrap();
        assert_eq!(accounts.run(), ExitCode::SUCCESS);
    }

    #[test]
    fn slots_never_outnumber_accounts() {
        let (runtime, _) = runtime(THREE_ACCOUNTS);
        let mut accounts = SyncAccountsArchitect::new(runtime);
        accounts.start(10).unwrap();
        assert_eq!(accounts.accounts.len(), 3);
        assert_eq!(accounts.run(), ExitCode::ERROR);
    }

    #[test]
    fn lost_drivers_fail_the_slot() {
        let (runtime, _) = runtime(THREE_ACCOUNTS);
        let mut account = SyncArchitect::new(Arc::clone(&runtime), "Account.0").unwrap();
        let tasks = Queue::new(runtime.backend()).unwrap();
        tasks.fill(&Vec::<String>::new()).unwrap();
        account.start(tasks).unwrap();

        // Folder work ends (killed) while the engine's pair is still out.
        let pair = account.engine.lend_drivers().unwrap();
        let mut folders = SyncFoldersArchitect::new(Arc::clone(&runtime), "Account.0");
        folders.kill().unwrap();
        account.folders = Some(folders);

        assert_eq!(account.exit_code(), ExitCode::ERROR);
        assert_eq!(account.exit_code(), ExitCode::ERROR);
        // Killed thread workers are only detached; let the driver loops end.
        pair.left.stop_serving().unwrap();
        pair.right.stop_serving().unwrap();
    }

    fn deliver(root: &Path, folder: &str, id: &str, body: &str) {
        let maildir = root.join(folder);
        for sub in ["cur", "new", "tmp"] {
            fs::create_dir_all(maildir.join(sub)).unwrap();
        }
        fs::write(maildir.join("new").join(id), body).unwrap();
    }

    #[test]
    fn forked_workers_sync_maildirs() {
        let dir = tempfile::tempdir().unwrap();
        let (left, right) = (dir.path().join("left"), dir.path().join("right"));
        deliver(&left, "INBOX", "1700000000.1.host", "Subject: hello\n");
        deliver(&left, "Sent", "1700000000.2.host", "Subject: re: hello\n");
        let config = Config::from_toml(&format!(
            r#"
            concurrency = "processes"

            [[accounts]]
            name = "A"
            left = "left"
            right = "right"

            [repositories.left]
            driver = "maildir"
            path = "{}"
            max_connections = 2

            [repositories.right]
            driver = "maildir"
            path = "{}"
            max_connections = 2
            "#,
            left.display(),
            right.display(),
        ))
        .unwrap();
        let runtime = Runtime::with_builtins(
            Arc::new(ProcessBackend::new().unwrap()),
            config,
            Arc::new(MemoryDriverFactory::new()),
        )
        .unwrap();

        let mut accounts = SyncAccountsArchitect::new(Arc::new(runtime));
        accounts.start(1).unwrap();
        assert_eq!(accounts.run(), ExitCode::SUCCESS);

        let copied = fs::read_to_string(right.join("INBOX/new/1700000000.1.host")).unwrap();
        assert_eq!(copied, "Subject: hello\n");
        assert!(right.join("Sent/new/1700000000.2.host").is_file());
    }
}
