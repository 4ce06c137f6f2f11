//! EngineArchitect - an engine worker wired to a left/right driver pair.
//!
//! Drivers start before the engine so they can answer its first command,
//! and are torn down before it. The pair can be lent out to one borrower
//! at a time (driver reuse) and must come back before it is lent again.

use std::sync::Arc;

use tracing::debug;

use super::architect::Architect;
use super::driver::{DriverEmitter, DriverPair, DriversArchitect, first_error};
use crate::domain::ArchitectError;
use crate::runtime::Runtime;

pub struct EngineArchitect {
    name: String,
    architect: Architect,
    drivers: DriversArchitect,
    lent: bool,
}

impl EngineArchitect {
    pub fn new(runtime: Arc<Runtime>, name: &str) -> Result<Self, ArchitectError> {
        Ok(Self {
            name: name.to_string(),
            drivers: DriversArchitect::new(Arc::clone(&runtime), name, 2)?,
            architect: Architect::new(runtime, format!("{name}.Engine")),
            lent: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn left_emitter(&self) -> Result<&DriverEmitter, ArchitectError> {
        self.drivers.emitter(0)
    }

    pub fn right_emitter(&self) -> Result<&DriverEmitter, ArchitectError> {
        self.drivers.emitter(1)
    }

    /// Start the drivers, then the engine running `runner(left, right)`.
    pub fn start<F>(&mut self, runner: F) -> Result<(), ArchitectError>
    where
        F: FnOnce(DriverEmitter, DriverEmitter) + Send + 'static,
    {
        self.drivers.init()?;
        self.drivers.start()?;
        let DriverPair { left, right } = self.drivers.pair()?;
        self.architect.start(move || runner(left, right))
    }

    /// Stop drivers, then join the engine.
    pub fn stop(&mut self) -> Result<(), ArchitectError> {
        first_error([self.drivers.stop(), self.architect.stop()])
    }

    /// Kill drivers, then the engine.
    pub fn kill(&mut self) -> Result<(), ArchitectError> {
        first_error([self.drivers.kill(), self.architect.kill()])
    }

    /// Hand the driver pair to a subordinate supervisor.
    pub fn lend_drivers(&mut self) -> Result<DriverPair, ArchitectError> {
        if self.lent {
            return Err(ArchitectError::DriversLent(self.name.clone()));
        }
        let pair = self.drivers.pair()?;
        self.lent = true;
        debug!(architect = %self.name, "drivers lent");
        Ok(pair)
    }

    pub fn return_drivers(&mut self, pair: DriverPair) -> Result<(), ArchitectError> {
        let ours = self.drivers.pair()?;
        let matches =
            pair.left.worker() == ours.left.worker() && pair.right.worker() == ours.right.worker();
        if !self.lent || !matches {
            return Err(ArchitectError::NotLent {
                name: self.name.clone(),
                worker: pair.left.worker().to_string(),
            });
        }
        self.lent = false;
        debug!(architect = %self.name, "drivers returned");
        Ok(())
    }

    pub fn drivers_lent(&self) -> bool {
        self.lent
    }
}
