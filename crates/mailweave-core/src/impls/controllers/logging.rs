//! `tracing` controller: logs every call before forwarding it.

use serde_json::Value;
use tracing::debug;

use crate::config::RepositoryConfig;
use crate::domain::DriverError;
use crate::message::Args;
use crate::ports::Driver;

pub struct LoggingController {
    inner: Box<dyn Driver>,
}

impl LoggingController {
    pub fn wrap(inner: Box<dyn Driver>, _config: &RepositoryConfig) -> Box<dyn Driver> {
        Box::new(Self { inner })
    }

    fn trace<T: std::fmt::Debug>(
        &self,
        call: &str,
        result: Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        match &result {
            Ok(value) => debug!(driver = self.inner.class_name(), call, result = ?value, "driver call"),
            Err(e) => debug!(driver = self.inner.class_name(), call, error = %e, "driver call failed"),
        }
        result
    }
}

impl Driver for LoggingController {
    fn class_name(&self) -> &str {
        self.inner.class_name()
    }

    fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    fn connect(&mut self) -> Result<bool, DriverError> {
        let result = self.inner.connect();
        self.trace("connect", result)
    }

    fn get_folders(&mut self) -> Result<Vec<String>, DriverError> {
        let result = self.inner.get_folders();
        self.trace("get_folders", result)
    }

    fn select(&mut self, folder: &str) -> Result<bool, DriverError> {
        let result = self.inner.select(folder);
        self.trace(&format!("select({folder})"), result)
    }

    fn logout(&mut self) -> Result<(), DriverError> {
        let result = self.inner.logout();
        self.trace("logout", result)
    }

    fn extensions(&self) -> Vec<&'static str> {
        self.inner.extensions()
    }

    fn call_extension(&mut self, name: &str, args: &Args) -> Result<Value, DriverError> {
        let result = self.inner.call_extension(name, args);
        // Values can be whole messages; log the outcome only.
        match &result {
            Ok(_) => debug!(driver = self.inner.class_name(), call = name, "driver call"),
            Err(e) => debug!(driver = self.inner.class_name(), call = name, error = %e, "driver call failed"),
        }
        result
    }
}
