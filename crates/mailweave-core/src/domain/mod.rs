//! Domain model: exit codes, identifiers and errors.

pub mod errors;
pub mod exit_code;
pub mod ids;

pub use self::errors::{
    ArchitectError, BackendError, DriverError, EmitError, EngineError, ErrorKind, HandlerError,
    RemoteError,
};
pub use self::exit_code::ExitCode;
pub use self::ids::{BrokerId, CallId};
