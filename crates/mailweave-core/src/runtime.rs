//! Runtime context handed to every architect and engine.
//!
//! Holds what a run shares: the concurrency backend, the configuration and
//! the driver/controller tables. Built once (mutable), then used read-only
//! behind an `Arc`. Forked workers get their own copy with the fork.

use std::sync::Arc;

use crate::config::{Config, ConfigError};
use crate::domain::DriverError;
use crate::impls::drivers::MemoryDriverFactory;
use crate::impls::{controllers, drivers};
use crate::ports::{BackendKind, ConcurrencyBackend, Driver};
use crate::typed::{ControllerRegistry, DriverRegistry, RegistryError};

pub struct Runtime {
    backend: Arc<dyn ConcurrencyBackend>,
    config: Arc<Config>,
    drivers: DriverRegistry,
    controllers: ControllerRegistry,
}

impl Runtime {
    /// Assemble a runtime; every repository must name a registered driver
    /// and registered controllers. Process-local drivers need the thread
    /// backend.
    pub fn new(
        backend: Arc<dyn ConcurrencyBackend>,
        config: Config,
        drivers: DriverRegistry,
        controllers: ControllerRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let forks = backend.kind() == BackendKind::Processes;
        for (name, repository) in &config.repositories {
            let Some(factory) = drivers.get(&repository.driver) else {
                return Err(ConfigError::UnknownDriver {
                    repository: name.clone(),
                    driver: repository.driver.clone(),
                });
            };
            if forks && factory.is_process_local() {
                return Err(ConfigError::ProcessLocalDriver {
                    repository: name.clone(),
                    driver: repository.driver.clone(),
                });
            }
            if let Some(controller) = repository
                .controllers
                .iter()
                .find(|c| !controllers.contains(c))
            {
                return Err(ConfigError::UnknownController {
                    repository: name.clone(),
                    controller: controller.clone(),
                });
            }
        }
        Ok(Self {
            backend,
            config: Arc::new(config),
            drivers,
            controllers,
        })
    }

    /// Runtime with the built-in drivers and controllers.
    pub fn with_builtins(
        backend: Arc<dyn ConcurrencyBackend>,
        config: Config,
        memory: Arc<MemoryDriverFactory>,
    ) -> Result<Self, ConfigError> {
        let (drivers, controllers) = builtin_registries(memory)?;
        Self::new(backend, config, drivers, controllers)
    }

    pub fn backend(&self) -> &dyn ConcurrencyBackend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn controllers(&self) -> &ControllerRegistry {
        &self.controllers
    }

    /// Build the driver of `repository`, wrapped in its controllers.
    pub fn build_driver(&self, repository: &str) -> Result<Box<dyn Driver>, DriverError> {
        let config = self
            .config
            .repository(repository)
            .ok_or_else(|| DriverError::UnknownRepository(repository.to_string()))?;
        let driver = self.drivers.build(repository, config)?;
        self.controllers.wrap(driver, config)
    }
}

pub fn builtin_registries(
    memory: Arc<MemoryDriverFactory>,
) -> Result<(DriverRegistry, ControllerRegistry), RegistryError> {
    let mut driver_registry = DriverRegistry::new();
    drivers::register_builtin(&mut driver_registry, memory)?;
    let mut controller_registry = ControllerRegistry::new();
    controllers::register_builtin(&mut controller_registry)?;
    Ok((driver_registry, controller_registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::ThreadBackend;
    use crate::impls::process::ProcessBackend;

    fn config(driver: &str, controllers: &str) -> Config {
        Config::from_toml(&format!(
            r#"
            [[accounts]]
            name = "a"
            left = "m"
            right = "m"

            [repositories.m]
            driver = "{driver}"
            controllers = [{controllers}]
            folders = {{ INBOX = ["hello"] }}
            "#
        ))
        .unwrap()
    }

    fn runtime(config: Config) -> Result<Runtime, ConfigError> {
        Runtime::with_builtins(
            Arc::new(ThreadBackend),
            config,
            Arc::new(MemoryDriverFactory::new()),
        )
    }

    #[test]
    fn builds_wrapped_driver() {
        let runtime = runtime(config("memory", r#""tracing", "name_translator""#)).unwrap();
        let mut driver = runtime.build_driver("m").unwrap();
        assert_eq!(driver.class_name(), "MemoryDriver");
        driver.connect().unwrap();
        assert_eq!(driver.get_folders().unwrap(), vec!["INBOX"]);
    }

    #[test]
    fn unknown_repository() {
        let runtime = runtime(config("memory", "")).unwrap();
        assert!(matches!(
            runtime.build_driver("nowhere"),
            Err(DriverError::UnknownRepository(_))
        ));
    }

    #[test]
    fn rejects_unregistered_driver_and_controller() {
        assert!(matches!(
            runtime(config("imap", "")),
            Err(ConfigError::UnknownDriver { .. })
        ));
        assert!(matches!(
            runtime(config("memory", r#""gpg""#)),
            Err(ConfigError::UnknownController { controller, .. }) if controller == "gpg"
        ));
    }

    #[test]
    fn memory_repositories_need_the_thread_backend() {
        let backend = Arc::new(ProcessBackend::new().unwrap());
        let result = Runtime::with_builtins(
            backend,
            config("memory", ""),
            Arc::new(MemoryDriverFactory::new()),
        );
        assert!(matches!(
            result,
            Err(ConfigError::ProcessLocalDriver { repository, driver })
                if repository == "m" && driver == "memory"
        ));
    }
}
