//! Run configuration, loaded once from TOML and read-only afterwards.
//!
//! ```toml
//! concurrency = "threads"
//! max_sync_accounts = 2
//!
//! [[accounts]]
//! name = "personal"
//! left = "local"
//! right = "backup"
//! folders.exclude = ["Trash"]
//!
//! [repositories.local]
//! driver = "maildir"
//! path = "~/Mail/personal"
//! max_connections = 2
//! controllers = ["tracing"]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::BackendKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no account configured")]
    NoAccounts,

    #[error("account {0} is configured twice")]
    DuplicateAccount(String),

    #[error("account {account} refers to undefined repository {repository}")]
    UnknownRepository { account: String, repository: String },

    #[error("repository {repository} uses unregistered driver {driver}")]
    UnknownDriver { repository: String, driver: String },

    #[error("repository {repository} uses unregistered controller {controller}")]
    UnknownController {
        repository: String,
        controller: String,
    },

    #[error("repository {repository} uses driver {driver}, which cannot be shared with worker processes")]
    ProcessLocalDriver { repository: String, driver: String },

    #[error("{what} must be at least 1")]
    InvalidCount { what: String },

    #[error(transparent)]
    Registry(#[from] crate::typed::RegistryError),
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_concurrency")]
    pub concurrency: BackendKind,

    /// Accounts synchronized at the same time.
    #[serde(default = "one")]
    pub max_sync_accounts: usize,

    pub accounts: Vec<AccountConfig>,

    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

fn default_concurrency() -> BackendKind {
    BackendKind::Threads
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    pub name: String,
    pub left: String,
    pub right: String,
    #[serde(default)]
    pub folders: FolderFilter,
}

/// Include/exclude lists; an empty `include` keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FolderFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl FolderFilter {
    pub fn keeps(&self, folder: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|f| f == folder);
        included && !self.exclude.iter().any(|f| f == folder)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Registered driver type, e.g. `maildir`.
    pub driver: String,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default = "one")]
    pub max_connections: usize,

    /// Controllers wrapped around the driver, innermost first.
    #[serde(default)]
    pub controllers: Vec<String>,

    /// Folder hierarchy separator of the repository (`name_translator`).
    #[serde(default)]
    pub separator: Option<String>,

    /// Initial content of in-memory repositories: folder -> messages.
    #[serde(default)]
    pub folders: BTreeMap<String, Vec<String>>,
}

impl RepositoryConfig {
    /// `path` with a leading `~/` expanded against `$HOME`.
    pub fn expanded_path(&self) -> Option<PathBuf> {
        let raw = self.path.as_deref()?;
        match (raw.strip_prefix("~/"), std::env::var_os("HOME")) {
            (Some(rest), Some(home)) => Some(Path::new(&home).join(rest)),
            _ => Some(PathBuf::from(raw)),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks. Driver and controller names are checked against
    /// the registries when the runtime is assembled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        if self.max_sync_accounts == 0 {
            return Err(ConfigError::InvalidCount {
                what: "max_sync_accounts".into(),
            });
        }
        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.name.as_str()) {
                return Err(ConfigError::DuplicateAccount(account.name.clone()));
            }
            for repository in [&account.left, &account.right] {
                if !self.repositories.contains_key(repository) {
                    return Err(ConfigError::UnknownRepository {
                        account: account.name.clone(),
                        repository: repository.clone(),
                    });
                }
            }
        }
        for (name, repository) in &self.repositories {
            if repository.max_connections == 0 {
                return Err(ConfigError::InvalidCount {
                    what: format!("repositories.{name}.max_connections"),
                });
            }
        }
        Ok(())
    }

    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.get(name)
    }

    pub fn account_names(&self) -> Vec<String> {
        self.accounts.iter().map(|a| a.name.clone()).collect()
    }

    /// Folder workers an account may run: bounded by the side with the
    /// fewest connections.
    pub fn max_folder_workers(&self, account: &AccountConfig) -> usize {
        let connections = |name: &str| self.repository(name).map_or(1, |r| r.max_connections);
        connections(&account.left).min(connections(&account.right)).max(1)
    }
}
