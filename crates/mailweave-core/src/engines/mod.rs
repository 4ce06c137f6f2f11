//! Engines - the business logic running inside account and folder workers.

pub mod account;
pub mod base;
pub mod folder;

pub use self::account::{AccountEngine, FoldersDone, accept_folders_done};
pub use self::base::{SyncEngine, run_and_report};
pub use self::folder::FolderEngine;
