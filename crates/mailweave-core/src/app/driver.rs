//! Driver workers and their supervisors.
//!
//! A driver worker runs a dispatch loop around a driver that does not exist
//! yet: the first `build_driver(repository)` builds it (controllers
//! included), after which the loop also answers to every extension the
//! driver declares. Building again for the same repository is a no-op, for
//! another repository the old driver is logged out and replaced.
//!
//! # Supervisors
//! - [`DriverArchitect`]: owns the worker; `stop` asks the loop to exit and joins
//! - [`ReuseDriverArchitect`]: borrows another supervisor's emitter, owns nothing
//! - [`DriversArchitect`]: a numbered set of either kind

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::architect::Architect;
use crate::domain::{ArchitectError, DriverError, EmitError, HandlerError};
use crate::message::{Args, Emitter, Receiver, new_emitter_receiver};
use crate::ports::Driver;
use crate::runtime::Runtime;
use crate::typed::RegistryError;

/// State owned by a driver worker's dispatch loop.
pub struct DriverState {
    runtime: Arc<Runtime>,
    worker: String,
    repository: Option<String>,
    driver: Option<Box<dyn Driver>>,
    /// Set when a new driver was built and its extensions must be (re)registered.
    rebuilt: bool,
}

impl DriverState {
    fn new(runtime: Arc<Runtime>, worker: &str) -> Self {
        Self {
            runtime,
            worker: worker.to_string(),
            repository: None,
            driver: None,
            rebuilt: false,
        }
    }

    fn driver(&mut self) -> Result<&mut Box<dyn Driver>, DriverError> {
        self.driver.as_mut().ok_or(DriverError::NotBuilt)
    }

    fn build(&mut self, repository: &str) -> Result<(), DriverError> {
        if self.repository.as_deref() == Some(repository) && self.driver.is_some() {
            return Ok(());
        }
        self.logout();
        let driver = self.runtime.build_driver(repository)?;
        info!(
            worker = %self.worker,
            repository,
            driver = driver.class_name(),
            "driver built"
        );
        self.repository = Some(repository.to_string());
        self.driver = Some(driver);
        self.rebuilt = true;
        Ok(())
    }

    fn logout(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            if let Err(e) = driver.logout() {
                warn!(worker = %self.worker, error = %e, "driver logout failed");
            }
        }
        self.repository = None;
    }

    fn call_extension(&mut self, name: &str, args: Args) -> Result<Value, HandlerError> {
        Ok(self.driver()?.call_extension(name, &args)?)
    }
}

type Operation = fn(&mut DriverState, Args) -> Result<Value, HandlerError>;

fn build_driver(state: &mut DriverState, args: Args) -> Result<Value, HandlerError> {
    let repository: String = args.get(0)?;
    state.build(&repository)?;
    Ok(Value::Null)
}

fn connect(state: &mut DriverState, _: Args) -> Result<Value, HandlerError> {
    Ok(json!(state.driver()?.connect()?))
}

fn get_folders(state: &mut DriverState, _: Args) -> Result<Value, HandlerError> {
    Ok(json!(state.driver()?.get_folders()?))
}

fn select(state: &mut DriverState, args: Args) -> Result<Value, HandlerError> {
    let folder: String = args.get(0)?;
    Ok(json!(state.driver()?.select(&folder)?))
}

fn logout(state: &mut DriverState, _: Args) -> Result<Value, HandlerError> {
    state.driver()?.logout()?;
    Ok(Value::Null)
}

fn is_local(state: &mut DriverState, _: Args) -> Result<Value, HandlerError> {
    Ok(json!(state.driver()?.is_local()))
}

fn class_name(state: &mut DriverState, _: Args) -> Result<Value, HandlerError> {
    Ok(json!(state.driver()?.class_name()))
}

const OPERATIONS: [(&str, Operation); 7] = [
    ("build_driver", build_driver),
    ("connect", connect),
    ("get_folders", get_folders),
    ("select", select),
    ("logout", logout),
    ("is_local", is_local),
    ("class_name", class_name),
];

fn register_operations(receiver: &mut Receiver<DriverState>) -> Result<(), RegistryError> {
    for (name, operation) in OPERATIONS {
        receiver.accept(name, operation)?;
    }
    Ok(())
}

/// Swap the extension handlers for those of the freshly built driver.
fn register_extensions(
    receiver: &mut Receiver<DriverState>,
    state: &DriverState,
    registered: &mut Vec<&'static str>,
) {
    for name in registered.drain(..) {
        receiver.forget(name);
    }
    let Some(driver) = state.driver.as_ref() else {
        return;
    };
    for name in driver.extensions() {
        if OPERATIONS.iter().any(|(fixed, _)| *fixed == name) {
            warn!(worker = %state.worker, extension = name, "extension shadows a driver operation, ignored");
            continue;
        }
        match receiver.accept(name, move |state: &mut DriverState, args| state.call_extension(name, args)) {
            Ok(()) => registered.push(name),
            Err(e) => warn!(worker = %state.worker, error = %e, "extension not registered"),
        }
    }
    debug!(worker = %state.worker, extensions = ?registered, "extensions registered");
}

/// Dispatch loop of a driver worker. Returns when told to stop serving.
fn serve_driver(runtime: Arc<Runtime>, mut receiver: Receiver<DriverState>) {
    let mut state = DriverState::new(runtime, receiver.worker());
    let mut extensions = Vec::new();
    loop {
        match receiver.receive(&mut state) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                error!(worker = %state.worker, error = %e, "driver queue failed");
                break;
            }
        }
        if std::mem::take(&mut state.rebuilt) {
            register_extensions(&mut receiver, &state, &mut extensions);
        }
    }
    state.logout();
    debug!(worker = %state.worker, "driver loop ended");
}

/// Typed handle on a driver worker.
#[derive(Debug, Clone)]
pub struct DriverEmitter {
    emitter: Emitter,
}

impl DriverEmitter {
    pub fn new(emitter: Emitter) -> Self {
        Self { emitter }
    }

    pub fn worker(&self) -> &str {
        self.emitter.worker()
    }

    pub fn build_driver(&self, repository: &str) -> Result<(), EmitError> {
        self.emitter.call_sync("build_driver", Args::one(repository)?)?;
        Ok(())
    }

    pub fn connect(&self) -> Result<bool, EmitError> {
        self.emitter.call_sync_as("connect", Args::new())
    }

    pub fn get_folders(&self) -> Result<Vec<String>, EmitError> {
        self.emitter.call_sync_as("get_folders", Args::new())
    }

    pub fn select(&self, folder: &str) -> Result<bool, EmitError> {
        self.emitter.call_sync_as("select", Args::one(folder)?)
    }

    pub fn logout(&self) -> Result<(), EmitError> {
        self.emitter.call_sync("logout", Args::new())?;
        Ok(())
    }

    pub fn is_local(&self) -> Result<bool, EmitError> {
        self.emitter.call_sync_as("is_local", Args::new())
    }

    pub fn class_name(&self) -> Result<String, EmitError> {
        self.emitter.call_sync_as("class_name", Args::new())
    }

    /// Fire-and-forget call of any operation, extensions included.
    pub fn call(&self, name: &str, args: Args) -> Result<(), EmitError> {
        self.emitter.call(name, args)
    }

    pub fn call_sync<T: DeserializeOwned>(&self, name: &str, args: Args) -> Result<T, EmitError> {
        self.emitter.call_sync_as(name, args)
    }

    pub fn stop_serving(&self) -> Result<(), EmitError> {
        self.emitter.stop_serving()
    }
}

/// Left and right handles of one account, lent as a unit.
#[derive(Debug, Clone)]
pub struct DriverPair {
    pub left: DriverEmitter,
    pub right: DriverEmitter,
}

/// Common surface of owned and reused driver supervisors.
pub trait DriverSupervisor: Send {
    fn emitter(&self) -> &DriverEmitter;

    /// Prepare the dispatch loop. Called by `start` when skipped.
    fn init(&mut self) -> Result<(), ArchitectError>;

    fn start(&mut self) -> Result<(), ArchitectError>;

    fn stop(&mut self) -> Result<(), ArchitectError>;

    fn kill(&mut self) -> Result<(), ArchitectError>;

    /// Whether the worker behind the emitter belongs to someone else.
    fn is_reused(&self) -> bool {
        false
    }
}

pub struct DriverArchitect {
    runtime: Arc<Runtime>,
    architect: Architect,
    emitter: DriverEmitter,
    receiver: Option<Receiver<DriverState>>,
    initialized: bool,
}

impl DriverArchitect {
    pub fn new(runtime: Arc<Runtime>, name: &str) -> Result<Self, ArchitectError> {
        let (receiver, emitter) = new_emitter_receiver(runtime.backend(), name)?;
        Ok(Self {
            architect: Architect::new(Arc::clone(&runtime), name),
            runtime,
            emitter: DriverEmitter::new(emitter),
            receiver: Some(receiver),
            initialized: false,
        })
    }
}

impl DriverSupervisor for DriverArchitect {
    fn emitter(&self) -> &DriverEmitter {
        &self.emitter
    }

    fn init(&mut self) -> Result<(), ArchitectError> {
        if self.initialized {
            return Ok(());
        }
        let receiver = self
            .receiver
            .as_mut()
            .ok_or_else(|| ArchitectError::AlreadyStarted(self.architect.name().to_string()))?;
        register_operations(receiver)?;
        self.initialized = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), ArchitectError> {
        self.init()?;
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| ArchitectError::AlreadyStarted(self.architect.name().to_string()))?;
        let runtime = Arc::clone(&self.runtime);
        self.architect.start(move || serve_driver(runtime, receiver))
    }

    fn stop(&mut self) -> Result<(), ArchitectError> {
        if self.architect.is_running() {
            self.emitter.stop_serving()?;
        }
        self.architect.stop()
    }

    fn kill(&mut self) -> Result<(), ArchitectError> {
        self.architect.kill()
    }
}

/// Supervisor over a driver worker owned elsewhere. `stop` only releases
/// the handle; `kill` asks the shared loop to exit, since a killed subtree
/// must not keep using it.
pub struct ReuseDriverArchitect {
    emitter: DriverEmitter,
    started: bool,
}

impl ReuseDriverArchitect {
    pub fn new(emitter: DriverEmitter) -> Self {
        Self {
            emitter,
            started: false,
        }
    }
}

impl DriverSupervisor for ReuseDriverArchitect {
    fn emitter(&self) -> &DriverEmitter {
        &self.emitter
    }

    fn init(&mut self) -> Result<(), ArchitectError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), ArchitectError> {
        if self.started {
            return Err(ArchitectError::AlreadyStarted(self.emitter.worker().to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ArchitectError> {
        if !self.started {
            return Err(ArchitectError::NotStarted(self.emitter.worker().to_string()));
        }
        debug!(worker = %self.emitter.worker(), "reused driver released");
        Ok(())
    }

    fn kill(&mut self) -> Result<(), ArchitectError> {
        if !self.started {
            return Err(ArchitectError::NotStarted(self.emitter.worker().to_string()));
        }
        self.emitter.stop_serving()?;
        Ok(())
    }

    fn is_reused(&self) -> bool {
        true
    }
}

/// Fixed, numbered set of driver supervisors named `<name>.Driver.<i>`.
pub struct DriversArchitect {
    name: String,
    drivers: Vec<Box<dyn DriverSupervisor>>,
    killed: bool,
}

impl DriversArchitect {
    /// `size` fresh driver workers.
    pub fn new(runtime: Arc<Runtime>, name: &str, size: usize) -> Result<Self, ArchitectError> {
        let drivers = (0..size)
            .map(|i| {
                DriverArchitect::new(Arc::clone(&runtime), &format!("{name}.Driver.{i}"))
                    .map(|d| Box::new(d) as Box<dyn DriverSupervisor>)
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            name: name.to_string(),
            drivers,
            killed: false,
        })
    }

    /// Wrap an already running pair instead of spawning workers.
    pub fn reuse(name: &str, pair: DriverPair) -> Self {
        Self {
            name: name.to_string(),
            drivers: vec![
                Box::new(ReuseDriverArchitect::new(pair.left)),
                Box::new(ReuseDriverArchitect::new(pair.right)),
            ],
            killed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn emitter(&self, index: usize) -> Result<&DriverEmitter, ArchitectError> {
        self.drivers
            .get(index)
            .map(|d| d.emitter())
            .ok_or_else(|| ArchitectError::SlotOutOfRange {
                name: self.name.clone(),
                index,
                size: self.drivers.len(),
            })
    }

    /// Slots 0 and 1.
    pub fn pair(&self) -> Result<DriverPair, ArchitectError> {
        Ok(DriverPair {
            left: self.emitter(0)?.clone(),
            right: self.emitter(1)?.clone(),
        })
    }

    pub fn is_reused(&self) -> bool {
        !self.drivers.is_empty() && self.drivers.iter().all(|d| d.is_reused())
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn init(&mut self) -> Result<(), ArchitectError> {
        self.drivers.iter_mut().try_for_each(|d| d.init())
    }

    pub fn start(&mut self) -> Result<(), ArchitectError> {
        self.drivers.iter_mut().try_for_each(|d| d.start())
    }

    /// Stop every driver, in order, even when one fails.
    pub fn stop(&mut self) -> Result<(), ArchitectError> {
        first_error(self.drivers.iter_mut().map(|d| d.stop()))
    }

    pub fn kill(&mut self) -> Result<(), ArchitectError> {
        self.killed = true;
        first_error(self.drivers.iter_mut().map(|d| d.kill()))
    }
}

/// Drive every result, keep the first error.
pub(crate) fn first_error<I>(results: I) -> Result<(), ArchitectError>
where
    I: IntoIterator<Item = Result<(), ArchitectError>>,
{
    let mut first = Ok(());
    for result in results {
        if let Err(e) = result {
            warn!(error = %e, "teardown step failed");
            if first.is_ok() {
                first = Err(e);
            }
        }
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::architect::tests::{runtime, runtime_on};
    use crate::domain::ErrorKind;
    use crate::impls::ThreadBackend;

    #[test]
    fn driver_worker_builds_then_serves_operations() {
        let mut architect = DriverArchitect::new(runtime(), "Test.Driver.0").unwrap();
        architect.start().unwrap();
        let driver = architect.emitter().clone();

        assert!(matches!(
            driver.connect().unwrap_err().remote().map(|r| r.kind),
            Some(ErrorKind::Driver)
        ));
        driver.build_driver("left").unwrap();
        assert_eq!(driver.class_name().unwrap(), "MemoryDriver");
        assert!(driver.connect().unwrap());
        assert!(driver.is_local().unwrap());
        assert!(driver.get_folders().unwrap().is_empty());

        architect.stop().unwrap();
    }

    #[test]
    fn extensions_are_registered_after_build() {
        let mut architect = DriverArchitect::new(runtime(), "Test.Driver.0").unwrap();
        architect.start().unwrap();
        let driver = architect.emitter().clone();

        let before = driver.call_sync::<Value>("create_folder", Args::one("INBOX").unwrap());
        assert_eq!(before.unwrap_err().remote().unwrap().kind, ErrorKind::UnknownEvent);

        driver.build_driver("left").unwrap();
        driver.connect().unwrap();
        driver.call_sync::<Value>("create_folder", Args::one("INBOX").unwrap()).unwrap();
        assert!(driver.select("INBOX").unwrap());
        let ids: Vec<String> = driver.call_sync("list_messages", Args::new()).unwrap();
        assert!(ids.is_empty());

        architect.stop().unwrap();
    }

    #[test]
    fn rebuilding_for_the_same_repository_keeps_the_driver() {
        let mut architect = DriverArchitect::new(runtime(), "Test.Driver.0").unwrap();
        architect.start().unwrap();
        let driver = architect.emitter().clone();

        driver.build_driver("left").unwrap();
        driver.connect().unwrap();
        driver.call_sync::<Value>("create_folder", Args::one("INBOX").unwrap()).unwrap();
        driver.build_driver("left").unwrap();
        // Still connected: the driver was not replaced.
        assert!(driver.select("INBOX").unwrap());

        driver.build_driver("right").unwrap();
        assert!(driver.select("INBOX").is_err());

        architect.stop().unwrap();
    }

    #[test]
    fn unknown_repository_fails_the_build() {
        let mut architect = DriverArchitect::new(runtime(), "Test.Driver.0").unwrap();
        architect.start().unwrap();
        let err = architect.emitter().build_driver("nowhere").unwrap_err();
        assert!(err.remote().unwrap().message.contains("nowhere"));
        architect.stop().unwrap();
    }

    #[test]
    fn drivers_architect_names_and_bounds() {
        let mut drivers = DriversArchitect::new(runtime(), "Account.0", 2).unwrap();
        assert_eq!(drivers.emitter(0).unwrap().worker(), "Account.0.Driver.0");
        assert_eq!(drivers.emitter(1).unwrap().worker(), "Account.0.Driver.1");
        assert!(matches!(
            drivers.emitter(2),
            Err(ArchitectError::SlotOutOfRange { index: 2, size: 2, .. })
        ));
        drivers.init().unwrap();
        drivers.start().unwrap();
        drivers.stop().unwrap();
    }

    #[test]
    fn reuse_stop_leaves_the_owner_running() {
        let runtime = runtime_on(Arc::new(ThreadBackend), crate::app::architect::tests::ONE_ACCOUNT);
        let mut owner = DriversArchitect::new(runtime, "Account.0", 2).unwrap();
        owner.start().unwrap();

        let mut reused = DriversArchitect::reuse("Account.0.Folder.0", owner.pair().unwrap());
        assert!(reused.is_reused());
        assert!(!owner.is_reused());
        reused.start().unwrap();
        reused.stop().unwrap();

        // The owner's loop still answers.
        owner.emitter(0).unwrap().build_driver("left").unwrap();
        owner.stop().unwrap();
    }

    #[test]
    fn reuse_requires_start_before_stop() {
        let owner = DriversArchitect::new(runtime(), "Account.0", 2).unwrap();
        let mut reused = ReuseDriverArchitect::new(owner.emitter(0).unwrap().clone());
        assert!(matches!(reused.stop(), Err(ArchitectError::NotStarted(_))));
        reused.start().unwrap();
        assert!(matches!(reused.start(), Err(ArchitectError::AlreadyStarted(_))));
    }
}
