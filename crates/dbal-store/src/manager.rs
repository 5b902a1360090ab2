//! The manager: one active driver plus a cache of repositories.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use dbal_telemetry::SharedSink;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::driver::Driver;
use crate::error::{ConfigurationError, ManagerError};
use crate::options::ConnectionOptions;
use crate::registry::DriverRegistry;
use crate::repository::{ManagerRef, Repository};
use crate::settings::Settings;

/// Shared, lockable access to the manager's driver.
#[derive(Clone, Debug)]
pub struct DriverHandle {
    driver: Arc<Mutex<Driver>>,
}

impl DriverHandle {
    fn new(driver: Driver) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
        }
    }

    /// Run `f` with exclusive access to the driver.
    pub fn with_driver<T>(&self, f: impl FnOnce(&mut Driver) -> T) -> T {
        let mut driver = self.driver.lock();
        f(&mut driver)
    }

    /// Lock the driver for a sequence of calls, e.g. a transaction.
    pub fn lock(&self) -> MutexGuard<'_, Driver> {
        self.driver.lock()
    }
}

type CachedRepository = Arc<dyn Any + Send + Sync>;

type RepositoryFactory =
    Arc<dyn Fn(ManagerRef, Option<SharedSink>) -> Result<CachedRepository, String> + Send + Sync>;

pub(crate) struct ManagerInner {
    driver: Option<DriverHandle>,
    logger: Option<SharedSink>,
    factories: HashMap<String, RepositoryFactory>,
    repositories: Mutex<HashMap<String, CachedRepository>>,
}

/// Cheaply clonable handle to the active driver and the repository cache.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::default()
    }

    /// Manager with a built-in or registered driver and no repositories.
    pub fn create(descriptor: &str, options: &ConnectionOptions) -> Result<Self, ConfigurationError> {
        Self::builder().driver(descriptor, options.clone()).build()
    }

    /// Manager configured from a loaded settings file.
    pub fn from_settings(
        settings: &Settings,
        logger: Option<SharedSink>,
    ) -> Result<Self, ConfigurationError> {
        let mut builder = Self::builder().driver(&settings.driver, settings.options.clone());
        if let Some(logger) = logger {
            builder = builder.logger(logger);
        }
        builder.build()
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> ManagerRef {
        ManagerRef::new(&self.inner)
    }

    pub fn driver(&self) -> Option<DriverHandle> {
        self.inner.driver.clone()
    }

    pub fn logger(&self) -> Option<SharedSink> {
        self.inner.logger.clone()
    }

    /// Registered repository identifiers, sorted.
    pub fn repository_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The repository registered as `identifier`, instantiated on first use
    /// and cached afterwards.
    pub fn repository<R: Repository>(&self, identifier: &str) -> Result<Arc<R>, ManagerError> {
        let cached = self.inner.repositories.lock().get(identifier).cloned();
        let instance = match cached {
            Some(instance) => instance,
            None => {
                let factory = self
                    .inner
                    .factories
                    .get(identifier)
                    .ok_or_else(|| ManagerError::UnknownRepository(identifier.to_string()))?;
                // Built without the cache lock held: a factory may resolve
                // other repositories.
                let created = factory(self.downgrade(), self.inner.logger.clone()).map_err(
                    |message| ManagerError::RepositoryInit {
                        identifier: identifier.to_string(),
                        message,
                    },
                )?;
                debug!(identifier, "repository instantiated");
                self.inner
                    .repositories
                    .lock()
                    .entry(identifier.to_string())
                    .or_insert(created)
                    .clone()
            }
        };

        instance
            .downcast::<R>()
            .map_err(|_| ManagerError::RepositoryType {
                identifier: identifier.to_string(),
                expected: type_name::<R>(),
            })
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("driver", &self.inner.driver.is_some())
            .field("repositories", &self.repository_ids())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Manager`].
#[derive(Default)]
pub struct ManagerBuilder {
    driver: Option<(String, ConnectionOptions)>,
    logger: Option<SharedSink>,
    registry: Option<DriverRegistry>,
    factories: HashMap<String, RepositoryFactory>,
}

impl ManagerBuilder {
    /// Driver descriptor (a short name such as `sqlite` or an externally
    /// registered identifier) and its options.
    pub fn driver(mut self, descriptor: impl Into<String>, options: ConnectionOptions) -> Self {
        self.driver = Some((descriptor.into(), options));
        self
    }

    pub fn logger(mut self, logger: SharedSink) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Resolve driver descriptors against `registry` instead of the built-ins.
    pub fn registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a repository factory under `identifier`.
    pub fn repository<R, F>(mut self, identifier: &str, factory: F) -> Self
    where
        R: Repository,
        F: Fn() -> Result<R, String> + Send + Sync + 'static,
    {
        let erased: RepositoryFactory = Arc::new(
            move |manager: ManagerRef, logger: Option<SharedSink>| -> Result<CachedRepository, String> {
                let mut repository = factory()?;
                if let Some(logger) = logger {
                    repository.accept_logger(logger);
                }
                repository.accept_manager(manager);
                Ok(Arc::new(repository))
            },
        );
        self.factories.insert(identifier.to_string(), erased);
        self
    }

    pub fn build(self) -> Result<Manager, ConfigurationError> {
        let driver = match &self.driver {
            Some((descriptor, options)) => {
                let registry = self.registry.unwrap_or_default();
                let driver = registry.create(descriptor, options, self.logger.clone())?;
                info!(driver = %descriptor, dsn = %driver.dsn(), "manager driver ready");
                Some(DriverHandle::new(driver))
            }
            None => None,
        };

        Ok(Manager {
            inner: Arc::new(ManagerInner {
                driver,
                logger: self.logger,
                factories: self.factories,
                repositories: Mutex::new(HashMap::new()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use dbal_telemetry::{LogLevel, MemorySink};

    use super::*;
    use crate::options::Dialect;
    use crate::repository::RepositoryBase;

    #[derive(Debug, Default)]
    struct NoteRepo {
        base: RepositoryBase,
    }

    impl Repository for NoteRepo {
        fn accept_logger(&mut self, logger: SharedSink) {
            self.base.set_logger(logger);
        }

        fn accept_manager(&mut self, manager: ManagerRef) {
            self.base.set_manager(manager);
        }
    }

    /// Accepts neither hook.
    #[derive(Debug)]
    struct PlainRepo;

    impl Repository for PlainRepo {}

    fn sqlite_builder() -> ManagerBuilder {
        Manager::builder().driver("sqlite", ConnectionOptions::default())
    }

    #[test]
    fn create_with_builtin_driver() {
        let manager = Manager::create("sqlite", &ConnectionOptions::default()).unwrap();
        let driver = manager.driver().unwrap();
        assert_eq!(driver.with_driver(|d| d.dialect()), Dialect::Sqlite);
    }

    #[test]
    fn unknown_driver_fails() {
        let err = Manager::create("oracle", &ConnectionOptions::default()).unwrap_err();
        assert_matches!(err, ConfigurationError::UnknownDriver(_));
    }

    #[test]
    fn manager_without_driver() {
        let manager = Manager::builder().build().unwrap();
        assert!(manager.driver().is_none());
    }

    #[test]
    fn external_driver_through_registry() {
        let mut registry = DriverRegistry::empty();
        registry.register_connect::<crate::sqlite::SqliteConnection>("acme.Lite");
        let manager = Manager::builder()
            .registry(registry)
            .driver("acme.Lite", ConnectionOptions::default())
            .build()
            .unwrap();
        assert!(manager.driver().is_some());

        let err = Manager::builder()
            .registry(DriverRegistry::empty())
            .driver("sqlite", ConnectionOptions::default())
            .build()
            .unwrap_err();
        assert_matches!(err, ConfigurationError::UnknownDriver(_));
    }

    #[test]
    fn repository_is_memoised() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let manager = sqlite_builder()
            .repository("notes", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(NoteRepo::default())
            })
            .build()
            .unwrap();

        let first = manager.repository::<NoteRepo>("notes").unwrap();
        let second = manager.repository::<NoteRepo>("notes").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repository_receives_logger_and_manager() {
        let sink = Arc::new(MemorySink::new());
        let manager = sqlite_builder()
            .logger(sink.clone())
            .repository("notes", || Ok(NoteRepo::default()))
            .build()
            .unwrap();

        let repo = manager.repository::<NoteRepo>("notes").unwrap();
        assert!(repo.base.has_logger());
        repo.base.log("hello", LogLevel::Notice);
        assert_eq!(sink.messages_at(LogLevel::Notice), vec!["hello"]);

        let driver = repo.base.driver().unwrap();
        assert!(Arc::ptr_eq(&driver.driver, &manager.driver().unwrap().driver));
    }

    #[test]
    fn no_logger_configured_is_not_injected() {
        let manager = sqlite_builder()
            .repository("notes", || Ok(NoteRepo::default()))
            .build()
            .unwrap();
        let repo = manager.repository::<NoteRepo>("notes").unwrap();
        assert!(!repo.base.has_logger());
    }

    #[test]
    fn repository_without_hooks() {
        let manager = sqlite_builder()
            .repository("plain", || Ok(PlainRepo))
            .build()
            .unwrap();
        assert!(manager.repository::<PlainRepo>("plain").is_ok());
    }

    #[test]
    fn unknown_repository() {
        let manager = sqlite_builder().build().unwrap();
        assert_matches!(
            manager.repository::<NoteRepo>("missing"),
            Err(ManagerError::UnknownRepository(ref id)) if id == "missing"
        );
    }

    #[test]
    fn factory_failure() {
        let manager = sqlite_builder()
            .repository::<NoteRepo, _>("broken", || Err("no schema".to_string()))
            .build()
            .unwrap();
        assert_matches!(
            manager.repository::<NoteRepo>("broken"),
            Err(ManagerError::RepositoryInit { ref message, .. }) if message == "no schema"
        );
    }

    #[test]
    fn wrong_type_requested() {
        let manager = sqlite_builder()
            .repository("plain", || Ok(PlainRepo))
            .build()
            .unwrap();
        assert_matches!(
            manager.repository::<NoteRepo>("plain"),
            Err(ManagerError::RepositoryType { .. })
        );
    }

    #[test]
    fn repository_outliving_manager_loses_driver() {
        let manager = sqlite_builder()
            .repository("notes", || Ok(NoteRepo::default()))
            .build()
            .unwrap();
        let repo = manager.repository::<NoteRepo>("notes").unwrap();
        drop(manager);
        assert_matches!(repo.base.driver(), Err(ManagerError::NoManager));
    }

    #[test]
    fn repository_without_driver() {
        let manager = Manager::builder()
            .repository("notes", || Ok(NoteRepo::default()))
            .build()
            .unwrap();
        let repo = manager.repository::<NoteRepo>("notes").unwrap();
        assert_matches!(repo.base.driver(), Err(ManagerError::NoDriver));
    }

    #[test]
    fn from_settings_builds_driver() {
        let settings = Settings::default();
        let manager = Manager::from_settings(&settings, None).unwrap();
        assert!(manager.driver().is_some());
    }
}
