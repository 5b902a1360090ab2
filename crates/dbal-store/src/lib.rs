pub mod charset;
pub mod driver;
pub mod error;
pub mod manager;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod native;
pub mod options;
pub mod protect;
pub mod registry;
pub mod repository;
pub mod settings;
pub mod sqlite;
pub mod value;

pub use driver::Driver;
pub use error::{
    ConfigurationError, ConnectionError, DatabaseError, Error, FieldError, ManagerError, Result,
};
pub use manager::{DriverHandle, Manager, ManagerBuilder};
pub use native::{Connect, NativeConnection};
pub use options::{ConnectionOptions, Dialect, Location};
pub use protect::ProtectOptions;
pub use registry::DriverRegistry;
pub use repository::{
    hydrate, hydrate_all, DynamicEntity, Entity, ManagerRef, Repository, RepositoryBase,
};
pub use settings::{load_settings, load_settings_from_path, Settings};
pub use value::{FromValue, Row, Value};
