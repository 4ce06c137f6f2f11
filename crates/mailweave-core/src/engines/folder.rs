//! FolderEngine - copies the messages of each queued folder from left to right.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::base::SyncEngine;
use crate::app::driver::{DriverEmitter, DriverPair};
use crate::domain::{EngineError, ExitCode};
use crate::message::Args;
use crate::runtime::Runtime;
use crate::typed::Channel;

pub struct FolderEngine {
    engine: SyncEngine,
    runtime: Arc<Runtime>,
    account: String,
    left: DriverEmitter,
    right: DriverEmitter,
    ready: bool,
}

impl FolderEngine {
    pub fn new(runtime: Arc<Runtime>, worker: &str, account: &str, drivers: DriverPair) -> Self {
        Self {
            engine: SyncEngine::new(worker),
            runtime,
            account: account.to_string(),
            left: drivers.left,
            right: drivers.right,
            ready: false,
        }
    }

    /// Sync every folder of `tasks`; a failing folder does not stop the loop.
    pub fn run(mut self, tasks: Channel<String>) -> ExitCode {
        for folder in tasks {
            self.engine.processing(&folder);
            match self.sync_folder(&folder) {
                Ok(copied) => {
                    info!(worker = %self.engine.worker(), folder = %folder, copied, "folder synced");
                    self.engine.set_exit_code(ExitCode::SUCCESS);
                }
                Err(e) => self.engine.fail(&folder, &e),
            }
        }
        self.engine.check_exit_code()
    }

    /// Build and connect both drivers once. Reused drivers are already
    /// built for the account, so building is a no-op for them.
    fn prepare(&mut self) -> Result<(), EngineError> {
        if self.ready {
            return Ok(());
        }
        let account = self
            .runtime
            .config()
            .account(&self.account)
            .ok_or_else(|| EngineError::UnknownAccount(self.account.clone()))?;
        for (driver, repository) in [(&self.left, &account.left), (&self.right, &account.right)] {
            driver.build_driver(repository)?;
            if !driver.connect()? {
                return Err(EngineError::NotConnected {
                    worker: driver.worker().to_string(),
                    repository: repository.clone(),
                });
            }
        }
        self.ready = true;
        Ok(())
    }

    fn sync_folder(&mut self, folder: &str) -> Result<usize, EngineError> {
        self.prepare()?;
        if !self.left.select(folder)? {
            warn!(worker = %self.engine.worker(), folder, "folder missing on the left, skipped");
            return Ok(0);
        }
        if !self.right.select(folder)? {
            debug!(worker = %self.engine.worker(), folder, "creating folder on the right");
            self.right.call_sync::<()>("create_folder", Args::one(folder)?)?;
            if !self.right.select(folder)? {
                return Err(EngineError::Unselectable(folder.to_string()));
            }
        }

        let present: HashSet<String> = self.right.call_sync("list_messages", Args::new())?;
        let wanted: Vec<String> = self.left.call_sync("list_messages", Args::new())?;
        let mut copied = 0;
        for id in wanted.into_iter().filter(|id| !present.contains(id)) {
            let body: Vec<u8> = self.left.call_sync("fetch_message", Args::one(&id)?)?;
            self.right
                .call_sync::<()>("append_message", Args::one(&id)?.arg(&body)?)?;
            copied += 1;
        }
        Ok(copied)
    }
}
