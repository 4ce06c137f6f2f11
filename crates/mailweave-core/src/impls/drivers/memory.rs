//! In-memory driver. Repositories live in the factory, so every driver built
//! for the same repository (in the same process) sees the same folders.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use super::maildir::extension_arg;
use crate::config::RepositoryConfig;
use crate::domain::DriverError;
use crate::message::Args;
use crate::ports::{Driver, DriverFactory};

pub const EXTENSIONS: [&str; 4] = [
    "list_messages",
    "fetch_message",
    "append_message",
    "create_folder",
];

/// folder -> message id -> body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    pub folders: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Seed from the repository's `folders` table; messages get ids `1`, `2`, ...
    pub fn seeded(folders: &BTreeMap<String, Vec<String>>) -> Self {
        let folders = folders
            .iter()
            .map(|(folder, messages)| {
                let messages = messages
                    .iter()
                    .enumerate()
                    .map(|(i, body)| ((i + 1).to_string(), body.as_bytes().to_vec()))
                    .collect();
                (folder.clone(), messages)
            })
            .collect();
        Self { folders }
    }

    pub fn message_ids(&self, folder: &str) -> Vec<String> {
        self.folders
            .get(folder)
            .map(|messages| messages.keys().cloned().collect())
            .unwrap_or_default()
    }
}

type SharedStore = Arc<Mutex<MemoryStore>>;

fn lock(store: &SharedStore) -> MutexGuard<'_, MemoryStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryDriverFactory {
    stores: Mutex<HashMap<String, SharedStore>>,
}

impl MemoryDriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a repository, if a driver was ever built for it.
    pub fn snapshot(&self, repository: &str) -> Option<MemoryStore> {
        let stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        stores.get(repository).map(|store| lock(store).clone())
    }
}

impl DriverFactory for MemoryDriverFactory {
    fn build(&self, repository: &str, config: &RepositoryConfig) -> Result<Box<dyn Driver>, DriverError> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let store = stores
            .entry(repository.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(MemoryStore::seeded(&config.folders))));
        Ok(Box::new(MemoryDriver {
            store: Arc::clone(store),
            connected: false,
            selected: None,
        }))
    }

    fn is_process_local(&self) -> bool {
        true
    }
}

pub struct MemoryDriver {
    store: SharedStore,
    connected: bool,
    selected: Option<String>,
}

impl MemoryDriver {
    fn selected(&self) -> Result<&str, DriverError> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        self.selected.as_deref().ok_or(DriverError::NoFolderSelected)
    }
}

impl Driver for MemoryDriver {
    fn class_name(&self) -> &str {
        "MemoryDriver"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn connect(&mut self) -> Result<bool, DriverError> {
        self.connected = true;
        Ok(true)
    }

    fn get_folders(&mut self) -> Result<Vec<String>, DriverError> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        Ok(lock(&self.store).folders.keys().cloned().collect())
    }

    fn select(&mut self, folder: &str) -> Result<bool, DriverError> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        if !lock(&self.store).folders.contains_key(folder) {
            return Ok(false);
        }
        self.selected = Some(folder.to_string());
        Ok(true)
    }

    fn logout(&mut self) -> Result<(), DriverError> {
        self.connected = false;
        self.selected = None;
        Ok(())
    }

    fn extensions(&self) -> Vec<&'static str> {
        EXTENSIONS.to_vec()
    }

    fn call_extension(&mut self, name: &str, args: &Args) -> Result<Value, DriverError> {
        match name {
            "list_messages" => {
                let folder = self.selected()?;
                Ok(json!(lock(&self.store).message_ids(folder)))
            }
            "fetch_message" => {
                let id: String = extension_arg(args, 0)?;
                let folder = self.selected()?;
                let store = lock(&self.store);
                let body = store
                    .folders
                    .get(folder)
                    .and_then(|messages| messages.get(&id))
                    .ok_or_else(|| DriverError::NoSuchMessage {
                        folder: folder.to_string(),
                        id: id.clone(),
                    })?;
                Ok(json!(body))
            }
            "append_message" => {
                let id: String = extension_arg(args, 0)?;
                let body: Vec<u8> = extension_arg(args, 1)?;
                let folder = self.selected()?.to_string();
                lock(&self.store)
                    .folders
                    .entry(folder)
                    .or_default()
                    .insert(id, body);
                Ok(Value::Null)
            }
            "create_folder" => {
                if !self.connected {
                    return Err(DriverError::NotConnected);
                }
                let folder: String = extension_arg(args, 0)?;
                lock(&self.store).folders.entry(folder).or_default();
                Ok(Value::Null)
            }
            other => Err(DriverError::Unsupported(other.to_string())),
        }
    }
}
