//! mailweave-core
//!
//! Supervision and message passing for mirroring mail accounts between two
//! repositories, on threads or on forked processes.
//!
//! # Modules
//! - **domain**: exit codes, identifiers, errors
//! - **ports**: concurrency backend and driver traits
//! - **impls**: thread and process backends, drivers, controllers
//! - **typed**: typed queues, channels, driver/controller registries
//! - **message**: emitter/receiver pairs
//! - **app**: architects (the supervision tree)
//! - **engines**: account and folder engines running inside workers
//! - **config**, **runtime**, **observability**: ambient context of a run

pub mod app;
pub mod config;
pub mod domain;
pub mod engines;
pub mod impls;
pub mod message;
pub mod observability;
pub mod ports;
pub mod runtime;
pub mod typed;

pub use self::app::SyncAccountsArchitect;
pub use self::config::Config;
pub use self::domain::ExitCode;
pub use self::runtime::Runtime;
