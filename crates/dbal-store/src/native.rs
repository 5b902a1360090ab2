//! The contract every dialect backend implements.
//!
//! A [`NativeConnection`] exposes the physical primitives only: statement
//! execution, quoting, catalog queries and one-level transactions. Nesting,
//! value protection, logging and statement counting live in
//! [`Driver`](crate::driver::Driver), which wraps a boxed native connection.

use crate::error::{ConnectionError, DatabaseError};
use crate::options::{ConnectionOptions, Dialect};
use crate::value::{Row, Value};

pub trait NativeConnection: Send {
    fn dialect(&self) -> Dialect;

    /// Physical `BEGIN`.
    fn begin(&mut self) -> Result<(), DatabaseError>;

    /// Physical `COMMIT`.
    fn commit(&mut self) -> Result<(), DatabaseError>;

    /// Physical `ROLLBACK`.
    fn rollback(&mut self) -> Result<(), DatabaseError>;

    /// Run a statement that returns no rows. Returns the affected row count.
    fn execute(&mut self, sql: &str) -> Result<u64, DatabaseError>;

    /// Run a query, binding `params` positionally.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError>;

    /// Quote `text` as a string literal using the engine's own escaping.
    fn quote(&mut self, text: &str) -> Result<String, DatabaseError>;

    fn table_names(&mut self) -> Result<Vec<String>, DatabaseError>;

    /// Character encoding of the connection, as an encoding label.
    fn encoding(&mut self) -> Result<String, DatabaseError>;

    /// Charset introducer token (`latin1` in `_latin1 X'...'`) for an encoding, if
    /// the dialect supports introducers.
    fn charset_for(&self, _encoding: &str) -> Option<&'static str> {
        None
    }

    fn last_insert_id(&mut self) -> Result<i64, DatabaseError>;

    /// Next auto-increment value of `table`, `None` if it has none.
    fn auto_increment(&mut self, table: &str) -> Result<Option<u64>, DatabaseError>;
}

/// Native connections that can be opened from connection options.
pub trait Connect: NativeConnection + Sized + 'static {
    /// Dialect whose option defaults apply before opening.
    fn dialect_kind() -> Dialect;

    /// Connection string for logging and error reporting.
    fn dsn(options: &ConnectionOptions) -> String;

    /// Open the physical connection. `options` already carry the dialect
    /// defaults.
    fn open(options: &ConnectionOptions, dsn: &str) -> Result<Self, ConnectionError>;
}
