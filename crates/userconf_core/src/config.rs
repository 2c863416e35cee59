//! Process settings for the document store, cache and logging.
//!
//! # Responsibility
//! - Load settings from a TOML file, falling back to defaults per field.
//! - Apply `USERCONF_*` environment overrides on top of file values.
//! - Translate settings into connection options for the core components.
//!
//! # Invariants
//! - Every field has a default, so an empty file is a valid configuration.
//! - Malformed override values are rejected instead of silently ignored.
//!
//! # Example
//!
//! ```toml
//! [database]
//! path = "/var/lib/userconf/documents.sqlite3"
//! busy_timeout_ms = 5000
//!
//! [cache]
//! enabled = true
//! path = "/var/lib/userconf/cache.sqlite3"
//! default_ttl_secs = 3600
//!
//! [logging]
//! level = "info"
//! dir = "/var/log/userconf"
//! max_file_size_mb = 10
//! keep_files = 5
//! ```

use crate::cache::CacheOptions;
use crate::db::{DbOptions, DEFAULT_BUSY_TIMEOUT};
use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DB_PATH: &str = "USERCONF_DB_PATH";
pub const ENV_DB_BUSY_TIMEOUT_MS: &str = "USERCONF_DB_BUSY_TIMEOUT_MS";
pub const ENV_CACHE_ENABLED: &str = "USERCONF_CACHE_ENABLED";
pub const ENV_CACHE_PATH: &str = "USERCONF_CACHE_PATH";
pub const ENV_CACHE_DEFAULT_TTL: &str = "USERCONF_CACHE_DEFAULT_TTL";
pub const ENV_LOG_LEVEL: &str = "USERCONF_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "USERCONF_LOG_DIR";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        origin: String,
        message: String,
    },
    InvalidValue {
        name: &'static str,
        value: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file `{}`: {source}", path.display())
            }
            Self::Parse { origin, message } => {
                write!(f, "failed to parse config from {origin}: {message}")
            }
            Self::InvalidValue { name, value } => {
                write!(f, "invalid value `{value}` for {name}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { .. } | Self::InvalidValue { .. } => None,
        }
    }
}

/// Document store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file; omitted means a private in-memory database.
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Cache database file; omitted means in-memory.
    pub path: Option<PathBuf>,
    /// Expiry applied by cache-aside reads; omitted means no expiry.
    pub default_ttl_secs: Option<u64>,
    pub busy_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            default_ttl_secs: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Logging settings. Without `dir`, file logging stays off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Absolute directory for rolling log files.
    pub dir: Option<String>,
    /// Size at which the active file is rotated.
    pub max_file_size_mb: u64,
    /// Rotated files kept on disk.
    pub keep_files: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
            max_file_size_mb: 10,
            keep_files: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Loads settings from an optional file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Reads and parses a TOML settings file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|err| ConfigError::Parse {
            origin: format!("`{}`", path.display()),
            message: err.to_string(),
        })
    }

    /// Parses settings from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|err| ConfigError::Parse {
            origin: "string".to_string(),
            message: err.to_string(),
        })
    }

    /// Applies overrides resolved by `lookup`; unset names keep file values.
    ///
    /// An empty `USERCONF_DB_PATH`/`USERCONF_CACHE_PATH` switches the store
    /// back to in-memory.
    pub fn apply_overrides<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DB_PATH) {
            self.database.path = non_empty_path(&value);
        }
        if let Some(value) = lookup(ENV_DB_BUSY_TIMEOUT_MS) {
            self.database.busy_timeout_ms = parse_value(ENV_DB_BUSY_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_CACHE_ENABLED) {
            self.cache.enabled = parse_value(ENV_CACHE_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_CACHE_PATH) {
            self.cache.path = non_empty_path(&value);
        }
        if let Some(value) = lookup(ENV_CACHE_DEFAULT_TTL) {
            self.cache.default_ttl_secs = match value.trim() {
                "" => None,
                _ => Some(parse_value(ENV_CACHE_DEFAULT_TTL, &value)?),
            };
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = value.trim().to_string();
        }
        if let Some(value) = lookup(ENV_LOG_DIR) {
            let trimmed = value.trim();
            self.logging.dir = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        Ok(self)
    }

    pub fn db_options(&self) -> DbOptions {
        DbOptions {
            busy_timeout: Duration::from_millis(self.database.busy_timeout_ms),
        }
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            path: self.cache.path.clone(),
            db: DbOptions {
                busy_timeout: Duration::from_millis(self.cache.busy_timeout_ms),
            },
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    u64::try_from(DEFAULT_BUSY_TIMEOUT.as_millis()).unwrap_or(5000)
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

fn parse_value<T: std::str::FromStr>(name: &'static str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        })
}
