//! SQLite backend on `rusqlite`.
//!
//! `table_names` lists every table in `sqlite_master`, including the
//! `sqlite_sequence` bookkeeping table, which SQLite creates as soon as a
//! table with an `AUTOINCREMENT` column exists.

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::charset;
use crate::error::{ConnectionError, DatabaseError};
use crate::native::{Connect, NativeConnection};
use crate::options::{sqlite_dsn, ConnectionOptions, Dialect, Location};
use crate::value::{Row, Value};

/// Encodings SQLite accepts in `PRAGMA encoding`.
const PRAGMA_ENCODINGS: &[(&str, &str)] = &[
    ("utf-8", "UTF-8"),
    ("utf8", "UTF-8"),
    ("utf-16", "UTF-16"),
    ("utf-16le", "UTF-16le"),
    ("utf-16be", "UTF-16be"),
];

pub struct SqliteConnection {
    conn: Connection,
    /// `PRAGMA encoding`, fetched on first use.
    encoding: Option<String>,
}

impl SqliteConnection {
    /// Borrow the underlying `rusqlite` connection.
    pub fn raw(&self) -> &Connection {
        &self.conn
    }
}

fn connect_error(dsn: &str, e: &rusqlite::Error) -> ConnectionError {
    let code = match e {
        rusqlite::Error::SqliteFailure(native, _) => Some(native.extended_code.to_string()),
        _ => None,
    };
    ConnectionError::new(dsn, code, e.to_string())
}

impl Connect for SqliteConnection {
    fn dialect_kind() -> Dialect {
        Dialect::Sqlite
    }

    fn dsn(options: &ConnectionOptions) -> String {
        sqlite_dsn(options)
    }

    fn open(options: &ConnectionOptions, dsn: &str) -> Result<Self, ConnectionError> {
        let conn = match options.location() {
            Location::Memory => Connection::open_in_memory(),
            Location::File => {
                let path = options
                    .path
                    .as_ref()
                    .ok_or_else(|| ConnectionError::new(dsn, None, "no database path configured"))?;
                Connection::open(path)
            }
        }
        .map_err(|e| connect_error(dsn, &e))?;

        if let Some(timeout) = options.timeout_duration() {
            conn.busy_timeout(timeout).map_err(|e| connect_error(dsn, &e))?;
        }

        // Only takes effect on a database that has no content yet.
        if let Some(pragma) = options.encoding.as_deref().and_then(|wanted| {
            let wanted = wanted.trim().to_ascii_lowercase();
            PRAGMA_ENCODINGS
                .iter()
                .find(|(label, _)| *label == wanted)
                .map(|(_, pragma)| *pragma)
        }) {
            conn.execute_batch(&format!("PRAGMA encoding = '{pragma}'"))
                .map_err(|e| connect_error(dsn, &e))?;
        }

        Ok(Self {
            conn,
            encoding: None,
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

impl NativeConnection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn begin(&mut self) -> Result<(), DatabaseError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        match self.conn.execute(sql, []) {
            Ok(changed) => Ok(changed as u64),
            Err(rusqlite::Error::MultipleStatement) => {
                self.conn.execute_batch(sql)?;
                Ok(self.conn.changes() as u64)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut mapped = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                mapped.push(name.clone(), from_value_ref(row.get_ref(idx)?));
            }
            out.push(mapped);
        }
        Ok(out)
    }

    fn quote(&mut self, text: &str) -> Result<String, DatabaseError> {
        // quote() stops at the first NUL.
        if text.contains('\0') {
            return Err(DatabaseError::Quote("text contains a NUL character".into()));
        }
        self.conn
            .query_row("SELECT quote(?1)", [text], |row| row.get::<_, String>(0))
            .map_err(|e| DatabaseError::Quote(e.to_string()))
    }

    fn table_names(&mut self) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn encoding(&mut self) -> Result<String, DatabaseError> {
        if let Some(encoding) = &self.encoding {
            return Ok(encoding.clone());
        }
        let pragma: String = self
            .conn
            .query_row("PRAGMA encoding", [], |row| row.get(0))?;
        let encoding = charset::normalize_sqlite_encoding(&pragma);
        debug!(encoding = %encoding, "sqlite encoding resolved");
        self.encoding = Some(encoding.clone());
        Ok(encoding)
    }

    fn last_insert_id(&mut self) -> Result<i64, DatabaseError> {
        Ok(self.conn.last_insert_rowid())
    }

    fn auto_increment(&mut self, table: &str) -> Result<Option<u64>, DatabaseError> {
        let has_sequence: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
            [],
            |row| row.get(0),
        )?;
        if !has_sequence {
            return Ok(None);
        }
        let seq: Option<i64> = self
            .conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq.map(|s| u64::try_from(s).unwrap_or(0) + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::path::PathBuf;

    fn memory() -> SqliteConnection {
        let options = ConnectionOptions::resolve(&Dialect::Sqlite, &ConnectionOptions::default());
        SqliteConnection::open(&options, "sqlite::memory:").unwrap()
    }

    #[test]
    fn opens_in_memory() {
        let mut conn = memory();
        assert_eq!(conn.dialect(), Dialect::Sqlite);
        assert!(conn.table_names().unwrap().is_empty());
    }

    #[test]
    fn missing_path_is_connection_error() {
        let options = ConnectionOptions {
            location: Some(Location::File),
            ..ConnectionOptions::default()
        };
        let err = SqliteConnection::open(&options, "sqlite:").err().unwrap();
        assert_eq!(err.dsn, "sqlite:");
        assert!(err.message.contains("no database path"));
    }

    #[test]
    fn unopenable_path_is_connection_error() {
        let options = ConnectionOptions {
            location: Some(Location::File),
            path: Some(PathBuf::from("/nonexistent-dbal-dir/a/b/c.db")),
            ..ConnectionOptions::default()
        };
        let dsn = sqlite_dsn(&options);
        let err = SqliteConnection::open(&options, &dsn).err().unwrap();
        assert_eq!(err.dsn, "sqlite:/nonexistent-dbal-dir/a/b/c.db");
        assert!(err.code.is_some());
    }

    #[test]
    fn quote_escapes_single_quotes() {
        let mut conn = memory();
        assert_eq!(conn.quote("a'b").unwrap(), "'a''b'");
        assert_eq!(conn.quote("").unwrap(), "''");
    }

    #[test]
    fn quote_rejects_embedded_nul() {
        let mut conn = memory();
        assert_matches!(conn.quote("a\0b'c"), Err(DatabaseError::Quote(_)));
    }

    #[test]
    fn query_maps_rows_in_column_order() {
        let mut conn = memory();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, data BLOB)")
            .unwrap();
        conn.query(
            "INSERT INTO t (name, score, data) VALUES (?1, ?2, ?3)",
            &[Value::from("x"), Value::Real(1.5), Value::Blob(vec![0, 1])],
        )
        .unwrap();

        let rows = conn.query("SELECT id, name, score, data FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.column_names().collect::<Vec<_>>(), vec!["id", "name", "score", "data"]);
        assert_eq!(row.get("id"), Some(&Value::Integer(1)));
        assert_eq!(row.get("name"), Some(&Value::Text("x".into())));
        assert_eq!(row.get("score"), Some(&Value::Real(1.5)));
        assert_eq!(row.get("data"), Some(&Value::Blob(vec![0, 1])));
    }

    #[test]
    fn null_parameters_bind() {
        let mut conn = memory();
        let rows = conn.query("SELECT ?1 IS NULL AS empty", &[Value::Null]).unwrap();
        assert_eq!(rows[0].get("empty"), Some(&Value::Integer(1)));
    }

    #[test]
    fn execute_reports_changes() {
        let mut conn = memory();
        conn.execute("CREATE TABLE t (v INTEGER)").unwrap();
        conn.execute("INSERT INTO t VALUES (1)").unwrap();
        conn.execute("INSERT INTO t VALUES (2)").unwrap();
        assert_eq!(conn.execute("UPDATE t SET v = v + 1").unwrap(), 2);
    }

    #[test]
    fn execute_accepts_multiple_statements() {
        let mut conn = memory();
        conn.execute("CREATE TABLE a (v INTEGER); CREATE TABLE b (v INTEGER);")
            .unwrap();
        assert_eq!(conn.table_names().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn bad_sql_is_query_error() {
        let mut conn = memory();
        let err = conn.execute("SELEC nonsense").unwrap_err();
        assert_matches!(err, DatabaseError::Query { .. });
    }

    #[test]
    fn encoding_is_memoized() {
        let mut conn = memory();
        assert_eq!(conn.encoding().unwrap(), "utf-8");
        assert_eq!(conn.encoding.as_deref(), Some("utf-8"));
        assert_eq!(conn.encoding().unwrap(), "utf-8");
    }

    #[test]
    fn configured_utf16_applies_to_new_database() {
        let options = ConnectionOptions {
            encoding: Some("UTF-16le".into()),
            ..ConnectionOptions::defaults_for(&Dialect::Sqlite)
        };
        let mut conn = SqliteConnection::open(&options, "sqlite::memory:").unwrap();
        assert_eq!(conn.encoding().unwrap(), "utf-16le");
    }

    #[test]
    fn auto_increment_reads_sqlite_sequence() {
        let mut conn = memory();
        conn.execute("CREATE TABLE plain (v INTEGER)").unwrap();
        assert_eq!(conn.auto_increment("plain").unwrap(), None);

        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, v TEXT)")
            .unwrap();
        assert_eq!(conn.auto_increment("t").unwrap(), None);
        conn.execute("INSERT INTO t (v) VALUES ('a')").unwrap();
        conn.execute("INSERT INTO t (v) VALUES ('b')").unwrap();
        assert_eq!(conn.auto_increment("t").unwrap(), Some(3));
        assert_eq!(conn.last_insert_id().unwrap(), 2);
    }

    #[test]
    fn physical_transaction_primitives() {
        let mut conn = memory();
        conn.execute("CREATE TABLE t (v INTEGER)").unwrap();
        conn.begin().unwrap();
        conn.execute("INSERT INTO t VALUES (1)").unwrap();
        conn.rollback().unwrap();
        let rows = conn.query("SELECT COUNT(*) AS n FROM t", &[]).unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(0)));
        assert!(conn.commit().is_err());
    }
}
