//! Built-in drivers.
//!
//! - **maildir**: folders on disk
//! - **memory**: folders in the factory, for tests and dry runs

pub mod maildir;
pub mod memory;

use std::sync::Arc;

pub use self::maildir::MaildirDriver;
pub use self::memory::{MemoryDriver, MemoryDriverFactory, MemoryStore};

use crate::typed::{DriverRegistry, RegistryError};

/// Register `maildir` and `memory`. The memory factory is passed in so the
/// caller can keep a handle on the repositories it holds.
pub fn register_builtin(
    registry: &mut DriverRegistry,
    memory: Arc<MemoryDriverFactory>,
) -> Result<(), RegistryError> {
    registry.register("maildir", MaildirDriver::build)?;
    registry.register_shared("memory", memory)?;
    Ok(())
}
