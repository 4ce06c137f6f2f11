//! AccountEngine - prepares each queued account and hands its folders over.
//!
//! For every account the engine builds and connects both drivers, merges
//! the two folder lists, filters them, then asks its supervisor to fan the
//! folders out (`sync_folders`). The drivers go with the request: the engine
//! does not touch them again until the supervisor answers `folders_done`.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::base::SyncEngine;
use crate::app::driver::{DriverEmitter, DriverPair};
use crate::domain::{EngineError, ExitCode};
use crate::message::{Args, Emitter, Receiver};
use crate::runtime::Runtime;
use crate::typed::{Channel, RegistryError};

/// What the engine's inbox holds between two `folders_done` events.
pub type FoldersDone = Option<ExitCode>;

/// Handlers of the engine's inbox.
pub fn accept_folders_done(inbox: &mut Receiver<FoldersDone>) -> Result<(), RegistryError> {
    inbox.accept("folders_done", |done: &mut FoldersDone, args| {
        *done = Some(args.get(0)?);
        Ok(Value::Null)
    })
}

pub struct AccountEngine {
    engine: SyncEngine,
    runtime: Arc<Runtime>,
    left: DriverEmitter,
    right: DriverEmitter,
    supervisor: Emitter,
    inbox: Receiver<FoldersDone>,
}

impl AccountEngine {
    pub fn new(
        runtime: Arc<Runtime>,
        worker: &str,
        drivers: DriverPair,
        supervisor: Emitter,
        inbox: Receiver<FoldersDone>,
    ) -> Self {
        Self {
            engine: SyncEngine::new(worker),
            runtime,
            left: drivers.left,
            right: drivers.right,
            supervisor,
            inbox,
        }
    }

    pub fn run(mut self, tasks: Channel<String>) -> ExitCode {
        for account in tasks {
            self.engine.processing(&account);
            match self.sync_account(&account) {
                Ok(code) => {
                    info!(worker = %self.engine.worker(), account = %account, %code, "account synced");
                    self.engine.set_exit_code(code);
                }
                Err(e) => self.engine.fail(&account, &e),
            }
        }
        self.engine.check_exit_code()
    }

    fn sync_account(&mut self, name: &str) -> Result<ExitCode, EngineError> {
        let runtime = Arc::clone(&self.runtime);
        let config = runtime.config();
        let account = config
            .account(name)
            .ok_or_else(|| EngineError::UnknownAccount(name.to_string()))?;

        let mut folders = Vec::new();
        for (driver, repository) in [(&self.left, &account.left), (&self.right, &account.right)] {
            driver.build_driver(repository)?;
            if !driver.connect()? {
                return Err(EngineError::NotConnected {
                    worker: driver.worker().to_string(),
                    repository: repository.clone(),
                });
            }
            folders.extend(driver.get_folders()?);
        }
        folders.sort();
        folders.dedup();
        folders.retain(|folder| account.folders.keeps(folder));

        if folders.is_empty() {
            info!(worker = %self.engine.worker(), account = name, "no folder to sync");
            return Ok(ExitCode::SUCCESS);
        }
        let max_workers = config.max_folder_workers(account);
        self.supervisor.call(
            "sync_folders",
            Args::one(name)?.arg(max_workers)?.arg(&folders)?,
        )?;
        self.await_folders()
    }

    /// Block until the supervisor reports the folders of the account.
    fn await_folders(&mut self) -> Result<ExitCode, EngineError> {
        let mut done: FoldersDone = None;
        loop {
            if let Some(code) = done.take() {
                return Ok(code);
            }
            if !self.inbox.receive(&mut done)? {
                return Err(EngineError::SupervisorGone("folders_done".into()));
            }
        }
    }
}
