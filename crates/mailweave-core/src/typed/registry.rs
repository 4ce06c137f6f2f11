//! Name -> factory tables for drivers and controllers.
//!
//! Built once while the runtime is assembled (mutable), then shared
//! read-only by every worker through `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RepositoryConfig;
use crate::domain::DriverError;
use crate::ports::{ControllerFactory, Driver, DriverFactory};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),
}

struct Table<F: ?Sized> {
    entries: HashMap<String, Arc<F>>,
}

impl<F: ?Sized> Default for Table<F> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<F: ?Sized> Table<F> {
    fn register(&mut self, name: &str, factory: Arc<F>) -> Result<(), RegistryError> {
        if self.entries.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        self.entries.insert(name.to_string(), factory);
        Ok(())
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Default)]
pub struct DriverRegistry {
    table: Table<dyn DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: impl DriverFactory + 'static,
    ) -> Result<(), RegistryError> {
        self.table.register(name, Arc::new(factory))
    }

    pub fn register_shared(
        &mut self,
        name: &str,
        factory: Arc<dyn DriverFactory>,
    ) -> Result<(), RegistryError> {
        self.table.register(name, factory)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DriverFactory>> {
        self.table.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.table.names()
    }

    pub fn build(
        &self,
        repository: &str,
        config: &RepositoryConfig,
    ) -> Result<Box<dyn Driver>, DriverError> {
        let factory = self
            .get(&config.driver)
            .ok_or_else(|| DriverError::UnknownDriver(config.driver.clone()))?;
        factory.build(repository, config)
    }
}

#[derive(Default)]
pub struct ControllerRegistry {
    table: Table<dyn ControllerFactory>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: impl ControllerFactory + 'static,
    ) -> Result<(), RegistryError> {
        self.table.register(name, Arc::new(factory))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.table.names()
    }

    /// Wrap `driver` in the repository's controllers, first listed innermost.
    pub fn wrap(
        &self,
        mut driver: Box<dyn Driver>,
        config: &RepositoryConfig,
    ) -> Result<Box<dyn Driver>, DriverError> {
        for name in &config.controllers {
            let factory = self
                .table
                .entries
                .get(name)
                .ok_or_else(|| DriverError::UnknownController(name.clone()))?;
            driver = factory.wrap(driver, config);
        }
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Named(&'static str);

    impl Driver for Named {
        fn class_name(&self) -> &str {
            self.0
        }
        fn is_local(&self) -> bool {
            true
        }
        fn connect(&mut self) -> Result<bool, DriverError> {
            Ok(true)
        }
        fn get_folders(&mut self) -> Result<Vec<String>, DriverError> {
            Ok(Vec::new())
        }
        fn select(&mut self, _folder: &str) -> Result<bool, DriverError> {
            Ok(true)
        }
        fn logout(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn repository(driver: &str, controllers: &[&str]) -> RepositoryConfig {
        RepositoryConfig {
            driver: driver.to_string(),
            path: None,
            max_connections: 1,
            controllers: controllers.iter().map(|c| c.to_string()).collect(),
            separator: None,
            folders: BTreeMap::new(),
        }
    }

    fn build_named(_: &str, _: &RepositoryConfig) -> Result<Box<dyn Driver>, DriverError> {
        Ok(Box::new(Named("Named")))
    }

    fn outer(_: Box<dyn Driver>, _: &RepositoryConfig) -> Box<dyn Driver> {
        Box::new(Named("Outer"))
    }

    #[test]
    fn register_and_build() {
        let mut registry = DriverRegistry::new();
        registry.register("named", build_named).unwrap();
        let driver = registry.build("repo", &repository("named", &[])).unwrap();
        assert_eq!(driver.class_name(), "Named");
        assert_eq!(registry.names(), vec!["named"]);
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = DriverRegistry::new();
        registry.register("named", build_named).unwrap();
        let err = registry.register("named", build_named).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(name) if name == "named"));
    }

    #[test]
    fn unknown_driver_type() {
        let registry = DriverRegistry::new();
        let err = registry.build("repo", &repository("imap", &[])).err().unwrap();
        assert!(matches!(err, DriverError::UnknownDriver(name) if name == "imap"));
    }

    #[test]
    fn controllers_wrap_in_order() {
        let mut controllers = ControllerRegistry::new();
        controllers.register("outer", outer).unwrap();
        let wrapped = controllers
            .wrap(Box::new(Named("Inner")), &repository("named", &["outer"]))
            .unwrap();
        assert_eq!(wrapped.class_name(), "Outer");

        let err = controllers
            .wrap(Box::new(Named("Inner")), &repository("named", &["missing"]))
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::UnknownController(_)));
    }
}
