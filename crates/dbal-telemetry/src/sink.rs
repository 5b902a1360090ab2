use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Severity of a message handed to a [`LogSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }

    /// Closest `tracing` level.
    pub fn to_tracing(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info | Self::Notice => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error | Self::Critical | Self::Alert | Self::Emergency => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "notice" => Ok(Self::Notice),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            "alert" => Ok(Self::Alert),
            "emergency" => Ok(Self::Emergency),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Injectable consumer of `(message, level)` pairs.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, level: LogLevel);
}

/// Shared handle to a sink, as held by drivers, managers and repositories.
pub type SharedSink = Arc<dyn LogSink>;

/// Sink that re-emits every message as a `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Debug => {
                tracing::debug!(target: "dbal", severity = level.as_str(), "{message}");
            }
            LogLevel::Info | LogLevel::Notice => {
                tracing::info!(target: "dbal", severity = level.as_str(), "{message}");
            }
            LogLevel::Warning => {
                tracing::warn!(target: "dbal", severity = level.as_str(), "{message}");
            }
            LogLevel::Error | LogLevel::Critical | LogLevel::Alert | LogLevel::Emergency => {
                tracing::error!(target: "dbal", severity = level.as_str(), "{message}");
            }
        }
    }
}

/// A log entry as captured by [`MemorySink`] or read back from [`SqliteLogSink`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

/// Sink that keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str, level: LogLevel) {
        self.entries.lock().push(LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level,
            message: message.to_string(),
        });
    }
}

/// SQLite sink that persists every entry to a `logs` table.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

const LOG_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);";

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(LOG_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(LOG_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: u32) -> Result<Vec<LogEntry>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT timestamp, level, message FROM logs ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map([limit], |row| {
            let level: String = row.get(1)?;
            Ok(LogEntry {
                timestamp: row.get(0)?,
                level: level.parse().unwrap_or(LogLevel::Info),
                message: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

impl LogSink for SqliteLogSink {
    fn log(&self, message: &str, level: LogLevel) {
        let conn = self.conn.lock();
        // A sink must never fail its caller.
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, message) VALUES (?1, ?2, ?3)",
            rusqlite::params![Utc::now().to_rfc3339(), level.as_str(), message],
        );
    }
}
