//! Error types shared across layers.
//!
//! Errors never unwind across a worker boundary. Whatever a handler returns
//! is flattened into a serializable [`RemoteError`] and travels back inside a
//! reply event, so a synchronous caller sees the same kind and message the
//! handler produced.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the concurrency primitives (workers, queues, locks).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cannot serialize queue item: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("cannot deserialize queue item: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    #[error("queue broker protocol error: {0}")]
    Protocol(String),

    #[error("worker {0} was already started")]
    AlreadyStarted(String),

    #[error("worker {0} was not started")]
    NotStarted(String),
}

/// Classification of an error raised on the far side of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The handler ran and reported a failure.
    Failed,
    /// Arguments could not be decoded into what the handler expects.
    Decode,
    /// No handler is registered under the event name.
    UnknownEvent,
    /// The driver behind the handler reported an error.
    Driver,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Failed => "failed",
            ErrorKind::Decode => "decode",
            ErrorKind::UnknownEvent => "unknown event",
            ErrorKind::Driver => "driver",
        };
        f.write_str(name)
    }
}

/// Error as carried on the wire inside a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Error returned by a receiver handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("argument {position}: {reason}")]
    Decode { position: String, reason: String },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<HandlerError> for RemoteError {
    fn from(err: HandlerError) -> Self {
        let kind = match &err {
            HandlerError::Failed(_) => ErrorKind::Failed,
            HandlerError::Decode { .. } => ErrorKind::Decode,
            HandlerError::Driver(_) => ErrorKind::Driver,
        };
        match err {
            HandlerError::Failed(message) => RemoteError::new(kind, message),
            other => RemoteError::new(kind, other.to_string()),
        }
    }
}

/// Failures seen by the caller of an emitter.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("cannot serialize argument: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("cannot decode reply of {event}: {source}")]
    Decode {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{event} failed in {worker}: {source}")]
    Remote {
        worker: String,
        event: String,
        #[source]
        source: RemoteError,
    },

    #[error("reply queue of {worker} closed while waiting for {event}")]
    Disconnected { worker: String, event: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl EmitError {
    /// The remote error, if the failure happened inside the handler.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            EmitError::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failures of a concrete driver or controller.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no driver built yet")]
    NotBuilt,

    #[error("driver not connected")]
    NotConnected,

    #[error("unknown repository {0}")]
    UnknownRepository(String),

    #[error("unknown driver type {0}")]
    UnknownDriver(String),

    #[error("unknown controller {0}")]
    UnknownController(String),

    #[error("repository {repository} is missing setting {setting}")]
    MissingSetting { repository: String, setting: String },

    #[error("folder {0} does not exist")]
    NoSuchFolder(String),

    #[error("no folder selected")]
    NoFolderSelected,

    #[error("message {id} not found in folder {folder}")]
    NoSuchMessage { folder: String, id: String },

    #[error("operation {0} is not supported by this driver")]
    Unsupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Failed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while an engine processes one task.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("account {0} is not configured")]
    UnknownAccount(String),

    #[error("cannot connect {worker} to {repository}")]
    NotConnected { worker: String, repository: String },

    #[error("folder {0} cannot be selected")]
    Unselectable(String),

    #[error("supervisor stopped answering while waiting for {0}")]
    SupervisorGone(String),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Misuse or failure of a supervisor.
#[derive(Debug, Error)]
pub enum ArchitectError {
    #[error("{0} was already started")]
    AlreadyStarted(String),

    #[error("{0} was not started")]
    NotStarted(String),

    #[error("{name} has {size} driver slots, index {index} is out of range")]
    SlotOutOfRange {
        name: String,
        index: usize,
        size: usize,
    },

    #[error("drivers of {0} are already lent out")]
    DriversLent(String),

    #[error("{name} did not lend the drivers of {worker}")]
    NotLent { name: String, worker: String },

    #[error("drivers lent by {0} were not returned")]
    DriversLost(String),

    #[error("{worker} sent an unreadable {event}: {reason}")]
    BadReport {
        worker: String,
        event: String,
        reason: String,
    },

    #[error("handler registration failed: {0}")]
    Registry(#[from] crate::typed::RegistryError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_handler_keeps_its_message() {
        let remote: RemoteError = HandlerError::failed("boom").into();
        assert_eq!(remote.kind, ErrorKind::Failed);
        assert_eq!(remote.message, "boom");
    }

    #[test]
    fn driver_errors_are_classified() {
        let remote: RemoteError = HandlerError::from(DriverError::NoSuchFolder("Junk".into())).into();
        assert_eq!(remote.kind, ErrorKind::Driver);
        assert!(remote.message.contains("Junk"));
    }

    #[test]
    fn remote_error_is_tagged_on_the_wire() {
        let remote = RemoteError::new(ErrorKind::UnknownEvent, "nope");
        let value = serde_json::to_value(&remote).unwrap();
        assert_eq!(value["kind"], "unknown_event");
        assert_eq!(value["message"], "nope");
    }
}
