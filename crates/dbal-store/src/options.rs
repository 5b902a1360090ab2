//! Connection options, dialect defaults and connection-string building.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::charset;

/// SQL dialect spoken by a native connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    MySql,
    /// Externally registered implementation.
    Other(String),
}

impl Dialect {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an SQLite database lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    File,
    #[default]
    Memory,
}

/// Driver options. Every key is optional; dialect defaults fill the gaps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub location: Option<Location>,
    pub path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unix_socket: Option<PathBuf>,
    pub dbname: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub encoding: Option<String>,
    /// Seconds.
    pub timeout: Option<u64>,
}

impl ConnectionOptions {
    /// Defaults for a dialect.
    pub fn defaults_for(dialect: &Dialect) -> Self {
        match dialect {
            Dialect::Sqlite => Self {
                location: Some(Location::Memory),
                timeout: Some(5),
                ..Self::default()
            },
            Dialect::MySql => Self {
                host: Some("localhost".to_string()),
                port: Some(3306),
                encoding: Some("utf-8".to_string()),
                timeout: Some(30),
                ..Self::default()
            },
            Dialect::Other(_) => Self::default(),
        }
    }

    /// Overlay every key set in `overrides` onto `self`.
    #[must_use]
    pub fn merge(mut self, overrides: &ConnectionOptions) -> Self {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        take(&mut self.location, &overrides.location);
        take(&mut self.path, &overrides.path);
        take(&mut self.host, &overrides.host);
        take(&mut self.port, &overrides.port);
        take(&mut self.unix_socket, &overrides.unix_socket);
        take(&mut self.dbname, &overrides.dbname);
        take(&mut self.username, &overrides.username);
        take(&mut self.password, &overrides.password);
        take(&mut self.encoding, &overrides.encoding);
        take(&mut self.timeout, &overrides.timeout);
        self
    }

    /// Dialect defaults merged with `overrides`.
    pub fn resolve(dialect: &Dialect, overrides: &ConnectionOptions) -> Self {
        Self::defaults_for(dialect).merge(overrides)
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn location(&self) -> Location {
        self.location.unwrap_or_default()
    }
}

/// SQLite connection string: `sqlite::memory:` or `sqlite:<path>`.
pub fn sqlite_dsn(options: &ConnectionOptions) -> String {
    match (options.location(), &options.path) {
        (Location::File, Some(path)) => format!("sqlite:{}", path.display()),
        (Location::File, None) => "sqlite:".to_string(),
        (Location::Memory, _) => "sqlite::memory:".to_string(),
    }
}

/// MySQL connection string. A unix socket replaces host and port; clauses
/// with no value are left out, as is the charset clause when the encoding is
/// not in the charset table.
pub fn mysql_dsn(options: &ConnectionOptions) -> String {
    let mut clauses = Vec::new();
    if let Some(socket) = &options.unix_socket {
        clauses.push(format!("unix_socket={}", socket.display()));
    } else {
        if let Some(host) = &options.host {
            clauses.push(format!("host={host}"));
        }
        if let Some(port) = options.port {
            clauses.push(format!("port={port}"));
        }
    }
    if let Some(dbname) = &options.dbname {
        clauses.push(format!("dbname={dbname}"));
    }
    if let Some(charset) = options.encoding.as_deref().and_then(charset::mysql_charset) {
        clauses.push(format!("charset={charset}"));
    }
    format!("mysql:{}", clauses.join(";"))
}
