//! MySQL backend on `sqlx`.
//!
//! The connection owns a private current-thread runtime and blocks on each
//! call, so it fits the same synchronous [`NativeConnection`] contract as the
//! SQLite backend.

use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlRow};
use sqlx::mysql::MySqlConnection as SqlxConnection;
use sqlx::query::Query;
use sqlx::{Column, Connection, MySql, Row as _, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::charset;
use crate::error::{ConnectionError, DatabaseError};
use crate::native::{Connect, NativeConnection};
use crate::options::{mysql_dsn, ConnectionOptions, Dialect};
use crate::value::{Row, Value};

pub struct MySqlConnection {
    runtime: Runtime,
    conn: SqlxConnection,
    dbname: Option<String>,
    /// Configured encoding, or the process locale's.
    encoding: String,
}

fn connect_error(dsn: &str, e: &sqlx::Error) -> ConnectionError {
    let code = e
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    ConnectionError::new(dsn, code, e.to_string())
}

impl Connect for MySqlConnection {
    fn dialect_kind() -> Dialect {
        Dialect::MySql
    }

    fn dsn(options: &ConnectionOptions) -> String {
        mysql_dsn(options)
    }

    fn open(options: &ConnectionOptions, dsn: &str) -> Result<Self, ConnectionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConnectionError::new(dsn, None, e.to_string()))?;

        let mut connect = MySqlConnectOptions::new();
        if let Some(socket) = &options.unix_socket {
            connect = connect.socket(socket);
        } else {
            if let Some(host) = &options.host {
                connect = connect.host(host);
            }
            if let Some(port) = options.port {
                connect = connect.port(port);
            }
        }
        if let Some(dbname) = &options.dbname {
            connect = connect.database(dbname);
        }
        if let Some(username) = &options.username {
            connect = connect.username(username);
        }
        if let Some(password) = &options.password {
            connect = connect.password(password);
        }
        // The session stays on sqlx's utf8mb4; literals in other charsets
        // carry their own introducer.
        let pending = SqlxConnection::connect_with(&connect);
        let outcome = runtime.block_on(async {
            match options.timeout_duration() {
                Some(limit) => tokio::time::timeout(limit, pending).await.ok(),
                None => Some(pending.await),
            }
        });
        let conn = match outcome {
            Some(result) => result.map_err(|e| connect_error(dsn, &e))?,
            None => return Err(ConnectionError::new(dsn, None, "connection timed out")),
        };

        Ok(Self {
            runtime,
            conn,
            dbname: options.dbname.clone(),
            encoding: charset::configured_or_ambient(options.encoding.as_deref(), |var| {
                std::env::var(var).ok()
            }),
        })
    }
}

impl MySqlConnection {
    fn raw(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        let result = self
            .runtime
            .block_on(sqlx::raw_sql(sql).execute(&mut self.conn))?;
        Ok(result.rows_affected())
    }

    fn raw_rows(&mut self, sql: &str) -> Result<Vec<MySqlRow>, DatabaseError> {
        Ok(self
            .runtime
            .block_on(sqlx::raw_sql(sql).fetch_all(&mut self.conn))?)
    }
}

fn bind<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Integer(i) => query.bind(*i),
        Value::Real(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Blob(b) => query.bind(b.clone()),
    }
}

/// Decode one column by its MySQL type name.
fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    let value = match type_name {
        "BOOLEAN" => Value::from(row.try_get_unchecked::<bool, _>(index)?),
        name if name.ends_with("UNSIGNED") => {
            let wide = row.try_get_unchecked::<u64, _>(index)?;
            match i64::try_from(wide) {
                Ok(i) => Value::Integer(i),
                Err(_) => Value::Text(wide.to_string()),
            }
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            Value::Integer(row.try_get_unchecked::<i64, _>(index)?)
        }
        "FLOAT" | "DOUBLE" => Value::Real(row.try_get_unchecked::<f64, _>(index)?),
        "DATE" => Value::Text(row.try_get_unchecked::<chrono::NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::Text(row.try_get_unchecked::<chrono::NaiveTime, _>(index)?.to_string()),
        "DATETIME" => Value::Text(
            row.try_get_unchecked::<chrono::NaiveDateTime, _>(index)?
                .to_string(),
        ),
        "TIMESTAMP" => Value::Text(
            row.try_get_unchecked::<chrono::DateTime<chrono::Utc>, _>(index)?
                .naive_utc()
                .to_string(),
        ),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT"
        | "GEOMETRY" => Value::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        // DECIMAL, character types, JSON, ENUM, SET
        _ => match row.try_get_unchecked::<String, _>(index) {
            Ok(s) => Value::Text(s),
            Err(_) => Value::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        },
    };
    Ok(value)
}

fn convert_row(row: &MySqlRow) -> Result<Row, sqlx::Error> {
    let mut converted = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name())?;
        converted.push(column.name(), value);
    }
    Ok(converted)
}

/// Escape text for a single-quoted MySQL string literal.
fn escape_literal(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `LIKE` pattern matching exactly `text`.
fn like_exact(text: &str) -> String {
    escape_literal(text)
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl NativeConnection for MySqlConnection {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn begin(&mut self) -> Result<(), DatabaseError> {
        self.raw("BEGIN").map(drop)
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        self.raw("COMMIT").map(drop)
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.raw("ROLLBACK").map(drop)
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        self.raw(sql)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError> {
        let rows = if params.is_empty() {
            self.raw_rows(sql)?
        } else {
            let query = params.iter().fold(sqlx::query(sql), bind);
            self.runtime.block_on(query.fetch_all(&mut self.conn))?
        };
        rows.iter()
            .map(|row| convert_row(row).map_err(DatabaseError::from))
            .collect()
    }

    fn quote(&mut self, text: &str) -> Result<String, DatabaseError> {
        let row = self
            .runtime
            .block_on(
                sqlx::query("SELECT QUOTE(?)")
                    .bind(text.to_string())
                    .fetch_one(&mut self.conn),
            )
            .map_err(|e| DatabaseError::Quote(e.to_string()))?;
        row.try_get_unchecked::<String, _>(0)
            .map_err(|e| DatabaseError::Quote(e.to_string()))
    }

    fn table_names(&mut self) -> Result<Vec<String>, DatabaseError> {
        self.raw_rows("SHOW TABLES")?
            .iter()
            .map(|row| {
                row.try_get_unchecked::<String, _>(0)
                    .map_err(DatabaseError::from)
            })
            .collect()
    }

    fn encoding(&mut self) -> Result<String, DatabaseError> {
        Ok(self.encoding.clone())
    }

    fn charset_for(&self, encoding: &str) -> Option<&'static str> {
        charset::mysql_introducer(encoding)
    }

    fn last_insert_id(&mut self) -> Result<i64, DatabaseError> {
        let rows = self.raw_rows("SELECT LAST_INSERT_ID()")?;
        let Some(row) = rows.first() else {
            return Ok(0);
        };
        let id = row.try_get_unchecked::<u64, _>(0)?;
        i64::try_from(id).map_err(|_| DatabaseError::query(format!("insert id {id} out of range")))
    }

    fn auto_increment(&mut self, table: &str) -> Result<Option<u64>, DatabaseError> {
        let pattern = like_exact(table);
        let sql = match &self.dbname {
            Some(db) => format!(
                "SHOW TABLE STATUS FROM `{}` LIKE '{pattern}'",
                db.replace('`', "``")
            ),
            None => format!("SHOW TABLE STATUS LIKE '{pattern}'"),
        };
        let rows = self.raw_rows(&sql)?;
        let row = rows.iter().find(|row| {
            row.try_get_unchecked::<String, _>("Name")
                .is_ok_and(|name| name == table)
        });
        let Some(row) = row else {
            debug!(table, "no table status");
            return Ok(None);
        };
        Ok(row.try_get_unchecked::<Option<u64>, _>("Auto_increment")?)
    }
}
