//! Maildir driver.
//!
//! A folder is any directory under the repository root holding `cur`, `new`
//! and `tmp`; its name is the path relative to the root with `/` between
//! components. A message id is the file name up to the `:` info suffix.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tracing::debug;

use crate::config::RepositoryConfig;
use crate::domain::DriverError;
use crate::message::Args;
use crate::ports::Driver;

const SUBDIRS: [&str; 3] = ["cur", "new", "tmp"];

pub const EXTENSIONS: [&str; 4] = [
    "list_messages",
    "fetch_message",
    "append_message",
    "create_folder",
];

pub struct MaildirDriver {
    repository: String,
    root: PathBuf,
    connected: bool,
    selected: Option<PathBuf>,
}

impl MaildirDriver {
    pub fn new(repository: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.to_string(),
            root: root.into(),
            connected: false,
            selected: None,
        }
    }

    /// `DriverFactory` entry for the registry.
    pub fn build(repository: &str, config: &RepositoryConfig) -> Result<Box<dyn Driver>, DriverError> {
        let root = config
            .expanded_path()
            .ok_or_else(|| DriverError::MissingSetting {
                repository: repository.to_string(),
                setting: "path".into(),
            })?;
        Ok(Box::new(Self::new(repository, root)))
    }

    fn folder_path(&self, folder: &str) -> Result<PathBuf, DriverError> {
        let valid = !folder.is_empty()
            && folder
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..");
        if !valid {
            return Err(DriverError::InvalidArgument(format!("folder name {folder:?}")));
        }
        Ok(self.root.join(folder))
    }

    fn selected(&self) -> Result<&Path, DriverError> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        self.selected.as_deref().ok_or(DriverError::NoFolderSelected)
    }

    fn list_messages(&self) -> Result<Vec<String>, DriverError> {
        let folder = self.selected()?;
        let mut ids = Vec::new();
        for sub in ["cur", "new"] {
            for entry in fs::read_dir(folder.join(sub))? {
                let name = entry?.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') {
                    continue;
                }
                ids.push(message_id(&name).to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn find_message(&self, id: &str) -> Result<PathBuf, DriverError> {
        let folder = self.selected()?;
        for sub in ["new", "cur"] {
            for entry in fs::read_dir(folder.join(sub))? {
                let entry = entry?;
                if message_id(&entry.file_name().to_string_lossy()) == id {
                    return Ok(entry.path());
                }
            }
        }
        Err(DriverError::NoSuchMessage {
            folder: folder.display().to_string(),
            id: id.to_string(),
        })
    }

    fn append_message(&self, id: &str, body: &[u8]) -> Result<(), DriverError> {
        let folder = self.selected()?;
        if id.is_empty() || id.contains(['/', ':']) {
            return Err(DriverError::InvalidArgument(format!("message id {id:?}")));
        }
        let staged = folder.join("tmp").join(id);
        fs::write(&staged, body)?;
        fs::rename(&staged, folder.join("new").join(id))?;
        Ok(())
    }

    fn create_folder(&self, folder: &str) -> Result<(), DriverError> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        let path = self.folder_path(folder)?;
        for sub in SUBDIRS {
            fs::create_dir_all(path.join(sub))?;
        }
        debug!(repository = %self.repository, folder, "folder created");
        Ok(())
    }
}

fn message_id(file_name: &str) -> &str {
    file_name.split(':').next().unwrap_or(file_name)
}

fn is_maildir(path: &Path) -> bool {
    SUBDIRS.iter().all(|sub| path.join(sub).is_dir())
}

fn collect_folders(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), DriverError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name();
        // cur/new/tmp belong to the maildir above them.
        if !entry.file_type()?.is_dir() || SUBDIRS.contains(&file_name.to_string_lossy().as_ref()) {
            continue;
        }
        if is_maildir(&path) {
            if let Ok(relative) = path.strip_prefix(root) {
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(parts.join("/"));
            }
        }
        collect_folders(root, &path, out)?;
    }
    Ok(())
}

impl Driver for MaildirDriver {
    fn class_name(&self) -> &str {
        "MaildirDriver"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn connect(&mut self) -> Result<bool, DriverError> {
        fs::create_dir_all(&self.root)?;
        self.connected = true;
        debug!(repository = %self.repository, root = %self.root.display(), "maildir opened");
        Ok(true)
    }

    fn get_folders(&mut self) -> Result<Vec<String>, DriverError> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        let mut folders = Vec::new();
        collect_folders(&self.root, &self.root, &mut folders)?;
        folders.sort();
        Ok(folders)
    }

    fn select(&mut self, folder: &str) -> Result<bool, DriverError> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        let path = self.folder_path(folder)?;
        if !is_maildir(&path) {
            return Ok(false);
        }
        self.selected = Some(path);
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
            "list_messages" => Ok(json!(self.list_messages()?)),
            "fetch_message" => {
                let id: String = extension_arg(args, 0)?;
                Ok(json!(fs::read(self.find_message(&id)?)?))
            }
            "append_message" => {
                let id: String = extension_arg(args, 0)?;
                let body: Vec<u8> = extension_arg(args, 1)?;
                self.append_message(&id, &body)?;
                Ok(Value::Null)
            }
            "create_folder" => {
                let folder: String = extension_arg(args, 0)?;
                self.create_folder(&folder)?;
                Ok(Value::Null)
            }
            other => Err(DriverError::Unsupported(other.to_string())),
        }
    }
}

/// Decode an extension argument, reported as a driver error.
pub(crate) fn extension_arg<T: serde::de::DeserializeOwned>(
    args: &Args,
    index: usize,
) -> Result<T, DriverError> {
    args.get(index)
        .map_err(|e| DriverError::InvalidArgument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(root: &Path) -> MaildirDriver {
        let mut driver = MaildirDriver::new("local", root);
        assert!(driver.connect().unwrap());
        driver
    }

    #[test]
    fn lists_nested_folders() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = connected(dir.path());
        for folder in ["INBOX", "INBOX/sent", "Archive"] {
            driver.create_folder(folder).unwrap();
        }
        fs::create_dir_all(dir.path().join("not-a-maildir")).unwrap();
        assert_eq!(driver.get_folders().unwrap(), vec!["Archive", "INBOX", "INBOX/sent"]);
    }

    #[test]
    fn select_reports_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = connected(dir.path());
        assert!(!driver.select("INBOX").unwrap());
        driver.create_folder("INBOX").unwrap();
        assert!(driver.select("INBOX").unwrap());
    }

    #[test]
    fn append_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = connected(dir.path());
        driver.create_folder("INBOX").unwrap();
        driver.select("INBOX").unwrap();

        let args = Args::new().arg("1700000000.1.host").unwrap().arg(b"Subject: hi\n".to_vec()).unwrap();
        driver.call_extension("append_message", &args).unwrap();
        // Delivered messages may later move to cur with flags.
        fs::write(dir.path().join("INBOX/cur/1700000000.2.host:2,S"), b"seen").unwrap();

        let ids: Vec<String> =
            serde_json::from_value(driver.call_extension("list_messages", &Args::new()).unwrap()).unwrap();
        assert_eq!(ids, vec!["1700000000.1.host", "1700000000.2.host"]);

        let body: Vec<u8> = serde_json::from_value(
            driver
                .call_extension("fetch_message", &Args::one("1700000000.2.host").unwrap())
                .unwrap(),
        )
        .unwrap();
        assert_eq!(body, b"seen");
        assert!(fs::read_dir(dir.path().join("INBOX/tmp")).unwrap().next().is_none());
    }

    #[test]
    fn operations_need_connection_and_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = MaildirDriver::new("local", dir.path());
        assert!(matches!(driver.get_folders(), Err(DriverError::NotConnected)));
        driver.connect().unwrap();
        assert!(matches!(driver.list_messages(), Err(DriverError::NoFolderSelected)));
    }

    #[test]
    fn rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let driver = connected(dir.path());
        assert!(matches!(driver.create_folder("../outside"), Err(DriverError::InvalidArgument(_))));
        assert!(matches!(driver.create_folder(""), Err(DriverError::InvalidArgument(_))));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = connected(dir.path());
        assert!(matches!(
            driver.call_extension("expunge", &Args::new()),
            Err(DriverError::Unsupported(_))
        ));
    }
}
