//! Typed layer over the raw ports.
//!
//! - **queue**: `Queue<T>` and `Channel<T>` on top of `RawQueue` frames
//! - **registry**: driver and controller factories by name

pub mod queue;
pub mod registry;

pub use self::queue::{Channel, Queue};
pub use self::registry::{ControllerRegistry, DriverRegistry, RegistryError};
