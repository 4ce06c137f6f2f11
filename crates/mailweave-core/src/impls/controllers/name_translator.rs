//! `name_translator` controller: presents folder names with `/` as the
//! hierarchy separator whatever the repository uses natively.

use serde_json::Value;

use crate::config::RepositoryConfig;
use crate::domain::DriverError;
use crate::message::Args;
use crate::ports::Driver;

const CANONICAL: &str = "/";

pub struct NameTranslator {
    inner: Box<dyn Driver>,
    separator: String,
}

impl NameTranslator {
    pub fn wrap(inner: Box<dyn Driver>, config: &RepositoryConfig) -> Box<dyn Driver> {
        let separator = config.separator.clone().unwrap_or_else(|| CANONICAL.to_string());
        Box::new(Self { inner, separator })
    }

    fn to_canonical(&self, native: &str) -> String {
        native.replace(&self.separator, CANONICAL)
    }

    fn to_native(&self, canonical: &str) -> String {
        canonical.replace(CANONICAL, &self.separator)
    }
}

impl Driver for NameTranslator {
    fn class_name(&self) -> &str {
        self.inner.class_name()
    }

    fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    fn connect(&mut self) -> Result<bool, DriverError> {
        self.inner.connect()
    }

    fn get_folders(&mut self) -> Result<Vec<String>, DriverError> {
        let folders = self.inner.get_folders()?;
        Ok(folders.iter().map(|f| self.to_canonical(f)).collect())
    }

    fn select(&mut self, folder: &str) -> Result<bool, DriverError> {
        let native = self.to_native(folder);
        self.inner.select(&native)
    }

    fn logout(&mut self) -> Result<(), DriverError> {
        self.inner.logout()
    }

    fn extensions(&self) -> Vec<&'static str> {
        self.inner.extensions()
    }

    fn call_extension(&mut self, name: &str, args: &Args) -> Result<Value, DriverError> {
        if name != "create_folder" {
            return self.inner.call_extension(name, args);
        }
        let mut args = args.clone();
        if let Some(Value::String(folder)) = args.positional.first_mut() {
            *folder = self.to_native(folder);
        }
        self.inner.call_extension(name, &args)
    }
}
