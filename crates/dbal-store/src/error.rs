//! Error types for the database-access layer.
//!
//! Each failure class has its own enum so callers can match on exactly what
//! an operation may return: [`ConnectionError`] from driver construction,
//! [`ConfigurationError`] from manager construction, [`ManagerError`] from
//! repository resolution and [`DatabaseError`] from everything that talks to
//! an open connection. [`Error`] wraps all of them for code that mixes
//! several layers, such as repositories.

use thiserror::Error;

/// Failed to establish the physical connection.
#[derive(Debug, Error)]
#[error("cannot connect to {dsn} ({}): {message}", .code.as_deref().unwrap_or("-"))]
pub struct ConnectionError {
    /// Connection string the driver tried to open. Never contains credentials.
    pub dsn: String,
    /// Native error code, when the underlying library reports one.
    pub code: Option<String>,
    /// Native error message.
    pub message: String,
}

impl ConnectionError {
    pub fn new(dsn: impl Into<String>, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            code,
            message: message.into(),
        }
    }
}

/// Failure of a statement, quoting call or transaction primitive.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("query failed ({}): {message}", .code.as_deref().unwrap_or("-"))]
    Query {
        code: Option<String>,
        message: String,
    },

    /// Native timeout-class failure (busy/locked database, lock wait timeout).
    #[error("timed out ({}): {message}", .code.as_deref().unwrap_or("-"))]
    Timeout {
        code: Option<String>,
        message: String,
    },

    #[error("cannot quote value: {0}")]
    Quote(String),

    #[error("commit called without a matching begin_transaction")]
    TransactionUnderflow,

    #[error(transparent)]
    Field(#[from] FieldError),
}

impl DatabaseError {
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            code: None,
            message: message.into(),
        }
    }

    /// Whether callers may reasonably retry the operation later.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Native error code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } | Self::Timeout { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(native, detail) => {
                let code = Some(native.extended_code.to_string());
                let message = detail.clone().unwrap_or_else(|| native.to_string());
                match native.code {
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                        Self::Timeout { code, message }
                    }
                    _ => Self::Query { code, message },
                }
            }
            _ => Self::query(e.to_string()),
        }
    }
}

#[cfg(feature = "mysql")]
impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                let sqlstate = db.code().map(|c| c.into_owned());
                let native = db
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|m| m.number());
                let message = db.message().to_string();
                // HY000 is MySQL's generic state; 1205 is a lock wait timeout.
                let timeout = sqlstate.as_deref() == Some("HY000") || native == Some(1205);
                let code = native.map(|n| n.to_string()).or(sqlstate);
                if timeout {
                    Self::Timeout { code, message }
                } else {
                    Self::Query { code, message }
                }
            }
            sqlx::Error::PoolTimedOut => Self::Timeout {
                code: None,
                message: e.to_string(),
            },
            sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => Self::Timeout {
                code: None,
                message: e.to_string(),
            },
            _ => Self::query(e.to_string()),
        }
    }
}

/// Invalid or unusable manager construction options.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("invalid option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error(transparent)]
    Connect(#[from] ConnectionError),

    #[error("cannot read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Repository resolution failure.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("unknown repository: {0}")]
    UnknownRepository(String),

    #[error("repository {identifier} is not a {expected}")]
    RepositoryType {
        identifier: String,
        expected: &'static str,
    },

    #[error("cannot instantiate repository {identifier}: {message}")]
    RepositoryInit { identifier: String, message: String },

    #[error("repository is not attached to a manager")]
    NoManager,

    #[error("manager has no active driver")]
    NoDriver,
}

/// Failure to assign a value to an entity field.
#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("unknown field: {0}")]
    Unknown(String),

    #[error("field {field} expects {expected}, got {found}")]
    Type {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Any error produced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Convenience alias for operations that may fail with any crate error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn connection_error_display() {
        let err = ConnectionError::new("sqlite:/nope/db.sqlite", Some("14".into()), "unable to open");
        assert_eq!(
            err.to_string(),
            "cannot connect to sqlite:/nope/db.sqlite (14): unable to open"
        );
    }

    #[test]
    fn connection_error_without_code() {
        let err = ConnectionError::new("mysql:host=db", None, "refused");
        assert_eq!(err.to_string(), "cannot connect to mysql:host=db (-): refused");
    }

    #[test]
    fn busy_maps_to_timeout() {
        let native = rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY);
        let err: DatabaseError =
            rusqlite::Error::SqliteFailure(native, Some("database is locked".into())).into();
        assert!(err.is_timeout());
        assert_eq!(err.code(), Some("5"));
    }

    #[test]
    fn constraint_maps_to_query() {
        let native = rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE);
        let err: DatabaseError =
            rusqlite::Error::SqliteFailure(native, Some("UNIQUE constraint failed".into())).into();
        assert_matches!(err, DatabaseError::Query { ref message, .. } if message == "UNIQUE constraint failed");
        assert!(!err.is_timeout());
    }

    #[test]
    fn non_native_error_has_no_code() {
        let err: DatabaseError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_matches!(err, DatabaseError::Query { code: None, .. });
    }

    #[test]
    fn underflow_display() {
        assert_eq!(
            DatabaseError::TransactionUnderflow.to_string(),
            "commit called without a matching begin_transaction"
        );
    }

    #[test]
    fn umbrella_conversions() {
        let err: Error = ManagerError::NoManager.into();
        assert_matches!(err, Error::Manager(ManagerError::NoManager));

        let err: Error = ConfigurationError::UnknownDriver("oracle".into()).into();
        assert_eq!(err.to_string(), "unknown driver: oracle");
    }

    #[test]
    fn field_error_display() {
        let err = FieldError::Type {
            field: "id".into(),
            expected: "integer",
            found: "text",
        };
        assert_eq!(err.to_string(), "field id expects integer, got text");
    }
}
