//! Impls - concrete backends, drivers and controllers.
//!
//! - **threads**: `ThreadBackend`
//! - **process**: `ProcessBackend` (fork + queue broker + flock)
//! - **drivers**: `maildir`, `memory`
//! - **controllers**: `tracing`, `name_translator`

pub mod controllers;
pub mod drivers;
pub mod process;
pub mod threads;

use std::sync::Arc;

pub use self::process::ProcessBackend;
pub use self::threads::ThreadBackend;

use crate::domain::BackendError;
use crate::ports::{BackendKind, ConcurrencyBackend};

pub fn create_backend(kind: BackendKind) -> Result<Arc<dyn ConcurrencyBackend>, BackendError> {
    Ok(match kind {
        BackendKind::Threads => Arc::new(ThreadBackend::new()),
        BackendKind::Processes => Arc::new(ProcessBackend::new()?),
    })
}
