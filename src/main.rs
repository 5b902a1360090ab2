use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbal_store::{
    load_settings, load_settings_from_path, Location, Manager, ProtectOptions, Row, Value,
};
use dbal_telemetry::{init_telemetry, LogLevel, SharedSink, SqliteLogSink, TelemetryConfig, TracingSink};

/// Inspect and query a database through the dbal driver layer.
#[derive(Parser, Debug)]
#[command(name = "dbal", about = "Database access layer CLI")]
struct Cli {
    /// Settings file (defaults to `dbal.json` in the working directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Driver descriptor, overriding the settings file.
    #[arg(long, global = true)]
    driver: Option<String>,

    /// SQLite database file; implies a file location.
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Persist driver events to this SQLite file instead of tracing them.
    #[arg(long, global = true)]
    log_db: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tables of the database.
    Tables,
    /// Print the connection encoding.
    Encoding,
    /// Print a value as a literal safe to inline into SQL.
    Protect {
        value: String,
        /// Quote numeric values too.
        #[arg(long)]
        force_quote: bool,
        /// Keep markup instead of stripping it.
        #[arg(long)]
        keep_tags: bool,
    },
    /// Run a query and print its rows, tab separated.
    Query { sql: String },
    /// Run a statement and print the affected row count.
    Exec { sql: String },
}

fn print_rows(rows: &[Row]) {
    let Some(first) = rows.first() else {
        return;
    };
    println!("{}", first.column_names().collect::<Vec<_>>().join("\t"));
    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .map(|(_, value)| match value {
                Value::Blob(bytes) => format!("<{} bytes>", bytes.len()),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;
    if let Some(driver) = cli.driver {
        settings.driver = driver;
    }
    if let Some(path) = cli.path {
        settings.options.location = Some(Location::File);
        settings.options.path = Some(path);
    }

    let level: LogLevel = settings.log_level.parse().unwrap_or(LogLevel::Info);
    init_telemetry(&TelemetryConfig {
        log_level: level.to_tracing(),
        json: cli.log_json,
        ..TelemetryConfig::default()
    });

    let sink: SharedSink = match &cli.log_db {
        Some(path) => Arc::new(
            SqliteLogSink::new(path)
                .with_context(|| format!("Failed to open log database: {}", path.display()))?,
        ),
        None => Arc::new(TracingSink),
    };

    let manager = Manager::from_settings(&settings, Some(sink))
        .with_context(|| format!("Failed to create {} driver", settings.driver))?;
    let handle = manager.driver().context("No driver configured")?;
    let mut driver = handle.lock();

    match cli.command {
        Command::Tables => {
            for name in driver.table_names()? {
                println!("{name}");
            }
        }
        Command::Encoding => println!("{}", driver.encoding()?),
        Command::Protect {
            value,
            force_quote,
            keep_tags,
        } => {
            let options = ProtectOptions {
                force_quote,
                strip_tags: !keep_tags,
            };
            println!("{}", driver.protect_with(&Value::from(value), options)?);
        }
        Command::Query { sql } => print_rows(&driver.query(&sql)?),
        Command::Exec { sql } => println!("{} row(s) affected", driver.exec(&sql)?),
    }

    tracing::debug!(statements = driver.query_count(), "done");
    Ok(())
}
