//! Repositories map query results onto typed entities.
//!
//! A repository reaches its driver through the [`Manager`] that created it.
//! It keeps only a [`ManagerRef`] (a weak handle), so the manager's
//! repository cache never keeps the manager itself alive.

use std::sync::{Arc, Weak};

use dbal_telemetry::{LogLevel, SharedSink};
use tracing::instrument;

use crate::error::{FieldError, ManagerError, Result};
use crate::manager::{DriverHandle, Manager, ManagerInner};
use crate::value::{Row, Value};

/// Something a row can be copied onto, one named field at a time.
pub trait Entity: Default {
    /// Assign `value` to the field called `name`.
    fn set_field(&mut self, name: &str, value: Value) -> std::result::Result<(), FieldError>;
}

/// Copy every column of `row` onto `entity`.
pub fn fill<E: Entity>(entity: &mut E, row: Row) -> std::result::Result<(), FieldError> {
    for (name, value) in row {
        entity.set_field(&name, value)?;
    }
    Ok(())
}

/// Build a fresh entity from a row.
pub fn hydrate<E: Entity>(row: Row) -> std::result::Result<E, FieldError> {
    let mut entity = E::default();
    fill(&mut entity, row)?;
    Ok(entity)
}

pub fn hydrate_all<E: Entity>(rows: Vec<Row>) -> std::result::Result<Vec<E>, FieldError> {
    rows.into_iter().map(hydrate).collect()
}

/// Entity that accepts any field name, in first-assignment order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DynamicEntity {
    fields: Vec<(String, Value)>,
}

impl DynamicEntity {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Entity for DynamicEntity {
    fn set_field(&mut self, name: &str, value: Value) -> std::result::Result<(), FieldError> {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
        Ok(())
    }
}

/// Non-owning reference to a [`Manager`].
#[derive(Clone, Debug)]
pub struct ManagerRef(Weak<ManagerInner>);

impl ManagerRef {
    pub(crate) fn new(inner: &Arc<ManagerInner>) -> Self {
        Self(Arc::downgrade(inner))
    }

    /// The manager, if it is still alive.
    pub fn upgrade(&self) -> Option<Manager> {
        self.0.upgrade().map(Manager::from_inner)
    }
}

/// A repository the [`Manager`] can instantiate and cache.
///
/// Both hooks are optional; the manager calls them once, right after the
/// factory returns and before the repository is cached.
pub trait Repository: Send + Sync + 'static {
    fn accept_logger(&mut self, _logger: SharedSink) {}

    fn accept_manager(&mut self, _manager: ManagerRef) {}
}

/// Shared plumbing for concrete repositories: the injected logger and
/// manager reference plus fetch helpers.
#[derive(Clone, Default)]
pub struct RepositoryBase {
    logger: Option<SharedSink>,
    manager: Option<ManagerRef>,
}

impl RepositoryBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_logger(&mut self, logger: SharedSink) {
        self.logger = Some(logger);
    }

    pub fn set_manager(&mut self, manager: ManagerRef) {
        self.manager = Some(manager);
    }

    pub fn has_logger(&self) -> bool {
        self.logger.is_some()
    }

    pub fn manager(&self) -> std::result::Result<Manager, ManagerError> {
        self.manager
            .as_ref()
            .and_then(ManagerRef::upgrade)
            .ok_or(ManagerError::NoManager)
    }

    /// The owning manager's driver.
    pub fn driver(&self) -> std::result::Result<DriverHandle, ManagerError> {
        self.manager()?.driver().ok_or(ManagerError::NoDriver)
    }

    pub fn log(&self, message: &str, level: LogLevel) {
        if let Some(sink) = &self.logger {
            sink.log(message, level);
        }
    }

    /// Run a parameterised query and hydrate every row.
    #[instrument(skip(self, params))]
    pub fn fetch_all<E: Entity>(&self, sql: &str, params: &[Value]) -> Result<Vec<E>> {
        let rows = self.driver()?.with_driver(|d| d.prepare(sql, params))?;
        Ok(hydrate_all(rows)?)
    }

    /// First row of a parameterised query, hydrated.
    #[instrument(skip(self, params))]
    pub fn fetch_one<E: Entity>(&self, sql: &str, params: &[Value]) -> Result<Option<E>> {
        let rows = self.driver()?.with_driver(|d| d.prepare(sql, params))?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(hydrate(row)?)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for RepositoryBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryBase")
            .field("logger", &self.logger.is_some())
            .field("manager", &self.manager.is_some())
            .finish()
    }
}
