//! Built-in controllers, chained in front of a driver in the order the
//! repository lists them.

pub mod logging;
pub mod name_translator;

pub use self::logging::LoggingController;
pub use self::name_translator::NameTranslator;

use crate::typed::{ControllerRegistry, RegistryError};

pub fn register_builtin(registry: &mut ControllerRegistry) -> Result<(), RegistryError> {
    registry.register("tracing", LoggingController::wrap)?;
    registry.register("name_translator", NameTranslator::wrap)?;
    Ok(())
}
