//! Ports - the seams between the supervision layer and what it runs on.
//!
//! - **backend**: workers, queues and locks (threads or processes)
//! - **driver**: storage backends and the controllers chained in front of them

pub mod backend;
pub mod driver;

pub use self::backend::{
    BackendKind, ConcurrencyBackend, Lock, LockGuard, RawQueue, Worker, WorkerEntry, WorkerStatus,
};
pub use self::driver::{ControllerFactory, Driver, DriverFactory};
