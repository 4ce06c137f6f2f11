//! App - the supervision tree.
//!
//! # Components
//! - **Architect**: owns one worker (start / stop / kill)
//! - **DriverArchitect / DriversArchitect**: driver workers and their dispatch loop
//! - **EngineArchitect**: an engine worker plus its left/right drivers
//! - **SyncFolderArchitect / SyncFoldersArchitect**: folder fan-out of one account
//! - **SyncArchitect / SyncAccountsArchitect**: account slots, the root of a run

pub mod account;
pub mod architect;
pub mod driver;
pub mod engine;
pub mod folder;

pub use self::account::{SyncAccountsArchitect, SyncArchitect};
pub use self::architect::Architect;
pub use self::driver::{
    DriverArchitect, DriverEmitter, DriverPair, DriverSupervisor, DriversArchitect,
    ReuseDriverArchitect,
};
pub use self::engine::EngineArchitect;
pub use self::folder::{SyncFolderArchitect, SyncFoldersArchitect};
