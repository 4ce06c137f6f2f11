//! Driver port - access to one side (left or right) of a sync.
//!
//! A driver is built inside a driver worker and only ever touched by that
//! worker's dispatch loop. Besides the fixed operations below, a driver
//! declares its extra operations statically through [`Driver::extensions`];
//! the dispatch loop registers one handler per declared name, so no runtime
//! introspection is needed.

use serde_json::Value;

use crate::config::RepositoryConfig;
use crate::domain::DriverError;
use crate::message::Args;

pub trait Driver: Send {
    fn class_name(&self) -> &str;

    fn is_local(&self) -> bool;

    fn connect(&mut self) -> Result<bool, DriverError>;

    fn get_folders(&mut self) -> Result<Vec<String>, DriverError>;

    fn select(&mut self, folder: &str) -> Result<bool, DriverError>;

    fn logout(&mut self) -> Result<(), DriverError>;

    /// Names of the extra operations this driver answers to.
    fn extensions(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn call_extension(&mut self, name: &str, args: &Args) -> Result<Value, DriverError> {
        let _ = args;
        Err(DriverError::Unsupported(name.to_string()))
    }
}

/// Builds drivers of one type from a repository definition.
pub trait DriverFactory: Send + Sync {
    fn build(
        &self,
        repository: &str,
        config: &RepositoryConfig,
    ) -> Result<Box<dyn Driver>, DriverError>;

    /// Drivers whose data lives in this process only. They see nothing a
    /// forked worker does.
    fn is_process_local(&self) -> bool {
        false
    }
}

impl<F> DriverFactory for F
where
    F: Fn(&str, &RepositoryConfig) -> Result<Box<dyn Driver>, DriverError> + Send + Sync,
{
    fn build(
        &self,
        repository: &str,
        config: &RepositoryConfig,
    ) -> Result<Box<dyn Driver>, DriverError> {
        self(repository, config)
    }
}

/// Wraps a driver (or an already wrapped driver) into one presenting the
/// same surface. Calls the controller does not care about are forwarded.
pub trait ControllerFactory: Send + Sync {
    fn wrap(&self, inner: Box<dyn Driver>, config: &RepositoryConfig) -> Box<dyn Driver>;
}

impl<F> ControllerFactory for F
where
    F: Fn(Box<dyn Driver>, &RepositoryConfig) -> Box<dyn Driver> + Send + Sync,
{
    fn wrap(&self, inner: Box<dyn Driver>, config: &RepositoryConfig) -> Box<dyn Driver> {
        self(inner, config)
    }
}
