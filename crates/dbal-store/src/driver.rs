//! The driver: one physical connection plus nested transactions, value
//! protection and statement logging.
//!
//! Transaction nesting is reference-counted. `begin_transaction` only talks
//! to the database on the 0→1 transition and `commit` only on the 1→0
//! transition, so layered code can open its own scope without knowing
//! whether a caller already did. `roll_back` always unwinds every level at
//! once: a failure anywhere inside the nest aborts the outermost operation.

use std::borrow::Cow;

use dbal_telemetry::{LogLevel, SharedSink};
use tracing::{debug, error, info, warn};

use crate::charset;
use crate::error::{ConnectionError, DatabaseError};
use crate::native::{Connect, NativeConnection};
use crate::options::{ConnectionOptions, Dialect};
use crate::protect::{strip_tags, ProtectOptions};
use crate::sqlite::SqliteConnection;
use crate::value::{Row, Value};

pub struct Driver {
    native: Box<dyn NativeConnection>,
    options: ConnectionOptions,
    dsn: String,
    depth: u32,
    active: bool,
    queries: u64,
    logger: Option<SharedSink>,
}

impl Driver {
    /// Resolve options against the dialect defaults and open a connection.
    pub fn connect<C: Connect>(
        overrides: &ConnectionOptions,
        logger: Option<SharedSink>,
    ) -> Result<Self, ConnectionError> {
        let options = ConnectionOptions::resolve(&C::dialect_kind(), overrides);
        let dsn = C::dsn(&options);

        match C::open(&options, &dsn) {
            Ok(native) => {
                info!(dsn = %dsn, "database connected");
                let driver = Self::from_native(Box::new(native), options, dsn, logger);
                driver.log(&format!("Connected to {}", driver.dsn), LogLevel::Info);
                Ok(driver)
            }
            Err(e) => {
                error!(dsn = %dsn, error = %e, "database connection failed");
                if let Some(sink) = &logger {
                    sink.log(&format!("Connection to {dsn} failed: {}", e.message), LogLevel::Critical);
                }
                Err(e)
            }
        }
    }

    /// SQLite driver with the given options.
    pub fn sqlite(overrides: &ConnectionOptions) -> Result<Self, ConnectionError> {
        Self::connect::<SqliteConnection>(overrides, None)
    }

    /// Private in-memory SQLite database.
    pub fn sqlite_in_memory() -> Result<Self, ConnectionError> {
        Self::sqlite(&ConnectionOptions::default())
    }

    /// Wrap an already open native connection.
    pub fn from_native(
        native: Box<dyn NativeConnection>,
        options: ConnectionOptions,
        dsn: String,
        logger: Option<SharedSink>,
    ) -> Self {
        Self {
            native,
            options,
            dsn,
            depth: 0,
            active: false,
            queries: 0,
            logger,
        }
    }

    pub fn set_logger(&mut self, logger: Option<SharedSink>) {
        self.logger = logger;
    }

    pub fn dialect(&self) -> Dialect {
        self.native.dialect()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn transaction_depth(&self) -> u32 {
        self.depth
    }

    /// Whether a physical transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.active
    }

    /// Statements run through `exec`, `query` and `prepare`.
    pub fn query_count(&self) -> u64 {
        self.queries
    }

    fn log(&self, message: &str, level: LogLevel) {
        if let Some(sink) = &self.logger {
            sink.log(message, level);
        }
    }

    // ── Transactions ────────────────────────────────────────────────

    pub fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        self.depth += 1;
        if self.depth == 1 && self.active {
            // Left open by a failed commit.
            debug!("reusing open transaction");
        } else if self.depth == 1 {
            if let Err(e) = self.native.begin() {
                self.depth = 0;
                warn!(error = %e, "begin failed");
                return Err(e);
            }
            self.active = true;
            debug!("transaction started");
        } else {
            debug!(depth = self.depth, "nested transaction level opened");
        }
        Ok(())
    }

    /// Close one nesting level; the outermost level commits.
    ///
    /// If the physical commit fails the depth is already 0 but the
    /// transaction stays active, so `roll_back` can still release it.
    pub fn commit(&mut self) -> Result<(), DatabaseError> {
        if self.depth == 0 {
            warn!("commit without matching begin_transaction");
            return Err(DatabaseError::TransactionUnderflow);
        }
        self.depth -= 1;
        if self.active && self.depth == 0 {
            self.native.commit()?;
            self.active = false;
            debug!("transaction committed");
        }
        Ok(())
    }

    /// Abort the whole transaction, whatever the nesting depth.
    pub fn roll_back(&mut self) -> Result<(), DatabaseError> {
        let unwound = self.depth;
        self.depth = 0;
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.native.rollback()?;
        debug!(levels = unwound, "transaction rolled back");
        Ok(())
    }

    /// Run `f` inside a transaction level: commit on `Ok`, roll back
    /// everything on `Err`.
    pub fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Driver) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => match self.commit() {
                Ok(()) => Ok(value),
                Err(err) => {
                    if let Err(rollback_err) = self.roll_back() {
                        warn!(error = %rollback_err, "rollback after failed commit failed");
                    }
                    Err(err.into())
                }
            },
            Err(err) => {
                if let Err(rollback_err) = self.roll_back() {
                    warn!(error = %rollback_err, "rollback after failed transaction body failed");
                }
                Err(err)
            }
        }
    }

    // ── Protection ──────────────────────────────────────────────────

    /// [`protect_with`](Self::protect_with) using the default options: numbers
    /// inline, markup stripped.
    pub fn protect(&mut self, value: &Value) -> Result<String, DatabaseError> {
        self.protect_with(value, ProtectOptions::default())
    }

    /// Render `value` as a literal safe to inline into statement text.
    pub fn protect_with(
        &mut self,
        value: &Value,
        options: ProtectOptions,
    ) -> Result<String, DatabaseError> {
        let text: Cow<'_, str> = match value {
            Value::Null => return Ok("NULL".to_string()),
            v if v.is_numeric() && !options.force_quote => return Ok(v.to_string()),
            Value::Text(s) => Cow::Borrowed(s.as_str()),
            Value::Blob(b) => charset::decode_detected(b),
            Value::Integer(_) | Value::Real(_) => Cow::Owned(value.to_string()),
        };

        let text = if options.strip_tags {
            strip_tags(&text)
        } else {
            text.into_owned()
        };

        let encoding = self.encoding()?;
        let text = charset::convert_to(&text, &encoding);
        if text.is_empty() {
            return Ok("''".to_string());
        }

        match self.native.charset_for(&encoding) {
            // The connection speaks UTF-8, so bytes in any other charset go
            // over the wire as hex.
            Some(introducer) if !charset::is_utf8(&encoding) => Ok(format!(
                "_{introducer} X'{}'",
                hex::encode_upper(charset::encode(&text, &encoding))
            )),
            Some(introducer) => Ok(format!("_{introducer}{}", self.native.quote(&text)?)),
            None => self.native.quote(&text),
        }
    }

    // ── Introspection ───────────────────────────────────────────────

    pub fn table_names(&mut self) -> Result<Vec<String>, DatabaseError> {
        self.native.table_names()
    }

    /// Character encoding of the connection.
    pub fn encoding(&mut self) -> Result<String, DatabaseError> {
        self.native.encoding()
    }

    pub fn auto_increment(&mut self, table: &str) -> Result<Option<u64>, DatabaseError> {
        self.native.auto_increment(table)
    }

    pub fn last_insert_id(&mut self) -> Result<i64, DatabaseError> {
        self.native.last_insert_id()
    }

    // ── Statements ──────────────────────────────────────────────────

    fn record(&mut self, sql: &str) {
        self.queries += 1;
        debug!(sql = %sql, count = self.queries, "statement");
        self.log(sql, LogLevel::Info);
    }

    /// Run a statement that returns no rows; returns the affected row count.
    pub fn exec(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        self.record(sql);
        self.native
            .execute(sql)
            .inspect_err(|e| warn!(sql = %sql, error = %e, "exec failed"))
    }

    pub fn query(&mut self, sql: &str) -> Result<Vec<Row>, DatabaseError> {
        self.record(sql);
        self.native
            .query(sql, &[])
            .inspect_err(|e| warn!(sql = %sql, error = %e, "query failed"))
    }

    /// Prepared statement with positional parameters.
    pub fn prepare(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError> {
        self.record(sql);
        self.native
            .query(sql, params)
            .inspect_err(|e| warn!(sql = %sql, error = %e, "prepared query failed"))
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        info!(dsn = %self.dsn, "database disconnected");
        self.log(&format!("Disconnected from {}", self.dsn), LogLevel::Info);
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("dialect", &self.dialect())
            .field("dsn", &self.dsn)
            .field("depth", &self.depth)
            .field("active", &self.active)
            .field("queries", &self.queries)
            .finish_non_exhaustive()
    }
}
