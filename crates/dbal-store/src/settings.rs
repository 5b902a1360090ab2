//! `dbal.json` settings. File values are layered over the defaults, then
//! `DBAL_*` environment variables win.

use std::path::{Path, PathBuf};

use dbal_telemetry::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::error::ConfigurationError;
use crate::options::{ConnectionOptions, Location};

pub const SETTINGS_FILE: &str = "dbal.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Driver descriptor passed to the manager.
    pub driver: String,
    pub options: ConnectionOptions,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            options: ConnectionOptions::default(),
            log_level: "info".to_string(),
        }
    }
}

/// `dbal.json` in the working directory.
pub fn settings_path() -> PathBuf {
    PathBuf::from(SETTINGS_FILE)
}

pub fn load_settings() -> Result<Settings, ConfigurationError> {
    load_settings_from_path(&settings_path())
}

/// Settings from `path`. A missing file means defaults only; malformed JSON
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings, ConfigurationError> {
    let mut layered = serde_json::to_value(Settings::default())?;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(?path, "settings file found");
            layered = deep_merge(layered, serde_json::from_str(&content)?);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no settings file");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: Settings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Overlay `overlay` onto `base`: objects merge key by key, nulls keep the
/// base value, anything else replaces it.
pub fn deep_merge(base: Json, overlay: Json) -> Json {
    match (base, overlay) {
        (Json::Object(mut fields), Json::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match fields.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                fields.insert(key, merged);
            }
            Json::Object(fields)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `DBAL_*` process environment overrides.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Empty and invalid values are
/// ignored.
///
/// `DBAL_PATH` also switches the location to `file`.
pub fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let options = &mut settings.options;

    if let Some(v) = read("DBAL_DRIVER") {
        settings.driver = v;
    }
    if let Some(v) = read("DBAL_PATH") {
        options.location = Some(Location::File);
        options.path = Some(PathBuf::from(v));
    }
    if let Some(v) = read("DBAL_HOST") {
        options.host = Some(v);
    }
    if let Some(v) = read("DBAL_PORT") {
        match parse_u16_range(&v, 1, 65535) {
            Some(port) => options.port = Some(port),
            None => warn!(key = "DBAL_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("DBAL_DBNAME") {
        options.dbname = Some(v);
    }
    if let Some(v) = read("DBAL_USERNAME") {
        options.username = Some(v);
    }
    if let Some(v) = read("DBAL_PASSWORD") {
        options.password = Some(v);
    }
    if let Some(v) = read("DBAL_ENCODING") {
        options.encoding = Some(v);
    }
    if let Some(v) = read("DBAL_TIMEOUT") {
        match parse_u64_range(&v, 1, 3600) {
            Some(timeout) => options.timeout = Some(timeout),
            None => warn!(key = "DBAL_TIMEOUT", value = %v, "invalid timeout env var, ignoring"),
        }
    }
    if let Some(v) = read("DBAL_LOG_LEVEL") {
        match v.parse::<LogLevel>() {
            Ok(_) => settings.log_level = v.to_lowercase(),
            Err(_) => warn!(key = "DBAL_LOG_LEVEL", value = %v, "invalid log level env var, ignoring"),
        }
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
