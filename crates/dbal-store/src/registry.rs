use std::collections::HashMap;
use std::sync::Arc;

use dbal_telemetry::SharedSink;

use crate::driver::Driver;
use crate::error::{ConfigurationError, ConnectionError};
use crate::native::Connect;
use crate::options::ConnectionOptions;
use crate::sqlite::SqliteConnection;

/// Builds a driver from connection options.
pub type DriverFactory = Arc<
    dyn Fn(&ConnectionOptions, Option<SharedSink>) -> Result<Driver, ConnectionError> + Send + Sync,
>;

/// Where a registered driver came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverSource {
    BuiltIn,
    External,
}

struct DriverEntry {
    factory: DriverFactory,
    source: DriverSource,
}

/// Registry of driver implementations, keyed by descriptor.
pub struct DriverRegistry {
    drivers: HashMap<String, DriverEntry>,
}

impl DriverRegistry {
    /// Empty registry, without the built-in drivers.
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Registry with the built-in short names (`sqlite`, and `mysql` when
    /// compiled in).
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.insert_connect::<SqliteConnection>("sqlite", DriverSource::BuiltIn);
        #[cfg(feature = "mysql")]
        registry.insert_connect::<crate::mysql::MySqlConnection>("mysql", DriverSource::BuiltIn);
        registry
    }

    fn insert_connect<C: Connect>(&mut self, name: &str, source: DriverSource) {
        let factory: DriverFactory =
            Arc::new(|options: &ConnectionOptions, logger: Option<SharedSink>| {
                Driver::connect::<C>(options, logger)
            });
        self.drivers
            .insert(name.to_string(), DriverEntry { factory, source });
    }

    /// Register an external driver under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectionOptions, Option<SharedSink>) -> Result<Driver, ConnectionError>
            + Send
            + Sync
            + 'static,
    {
        self.drivers.insert(
            name.into(),
            DriverEntry {
                factory: Arc::new(factory),
                source: DriverSource::External,
            },
        );
    }

    /// Register a [`Connect`] implementation under `name`.
    pub fn register_connect<C: Connect>(&mut self, name: &str) {
        self.insert_connect::<C>(name, DriverSource::External);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.drivers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    pub fn source(&self, name: &str) -> Option<&DriverSource> {
        self.drivers.get(name).map(|e| &e.source)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Construct the driver registered as `name`.
    pub fn create(
        &self,
        name: &str,
        options: &ConnectionOptions,
        logger: Option<SharedSink>,
    ) -> Result<Driver, ConfigurationError> {
        let entry = self
            .drivers
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownDriver(name.to_string()))?;
        Ok((entry.factory)(options, logger)?)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
