//! Rolling file logs configured from `LoggingSettings`.
//!
//! # Responsibility
//! - Turn `[logging]` settings into a validated file target and start
//!   `flexi_logger` on it once per process.
//! - Record panics as metadata-only `event=panic_captured` lines.
//!
//! # Invariants
//! - A second init with an identical target is a no-op; any difference in
//!   level, directory or rotation is rejected.
//! - No directory configured means no file logging and no error.
//! - Init never panics.

use crate::config::LoggingSettings;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "userconf";
const BYTES_PER_MB: u64 = 1024 * 1024;
const PANIC_PAYLOAD_LIMIT: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();

/// Where and how log files are written, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogTarget {
    level: &'static str,
    dir: PathBuf,
    rotate_bytes: u64,
    keep_files: usize,
}

impl LogTarget {
    /// `Ok(None)` when the settings leave file logging off.
    fn from_settings(settings: &LoggingSettings) -> Result<Option<Self>, String> {
        let Some(dir) = settings.dir.as_deref() else {
            return Ok(None);
        };
        if settings.max_file_size_mb == 0 {
            return Err("max_file_size_mb must be at least 1".to_string());
        }
        if settings.keep_files == 0 {
            return Err("keep_files must be at least 1".to_string());
        }
        Ok(Some(Self {
            level: parse_level(&settings.level)?,
            dir: absolute_dir(dir)?,
            rotate_bytes: settings.max_file_size_mb.saturating_mul(BYTES_PER_MB),
            keep_files: settings.keep_files,
        }))
    }

    fn start(&self) -> Result<LoggerHandle, String> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|err| format!("cannot create log dir `{}`: {err}", self.dir.display()))?;

        Logger::try_with_str(self.level)
            .map_err(|err| format!("logger rejected level `{}`: {err}", self.level))?
            .log_to_file(
                FileSpec::default()
                    .directory(self.dir.as_path())
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(self.rotate_bytes),
                Naming::Numbers,
                Cleanup::KeepLogFiles(self.keep_files),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| format!("logger failed to start: {err}"))
    }
}

impl Display for LogTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "level={} dir={} rotate_bytes={} keep_files={}",
            self.level,
            self.dir.display(),
            self.rotate_bytes,
            self.keep_files
        )
    }
}

struct ActiveLogger {
    target: LogTarget,
    _handle: LoggerHandle,
}

/// Starts file logging as described by `settings`.
///
/// Returns `Ok(false)` when `settings.dir` is unset, `Ok(true)` once logs
/// are written to disk.
///
/// # Errors
/// - Unknown level, relative or empty directory, zero rotation limits.
/// - The directory cannot be created or the backend fails to start.
/// - Logging is already active with a different target.
pub fn init_logging_from(settings: &LoggingSettings) -> Result<bool, String> {
    let Some(requested) = LogTarget::from_settings(settings)? else {
        return Ok(false);
    };

    let active = ACTIVE.get_or_try_init(|| -> Result<ActiveLogger, String> {
        let handle = requested.start()?;
        install_panic_hook();
        info!(
            "event=logging_init module=core status=ok version={} platform={} {}",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            requested
        );
        Ok(ActiveLogger {
            target: requested.clone(),
            _handle: handle,
        })
    })?;

    if active.target != requested {
        return Err(format!(
            "logging already active with {}; refusing to switch to {}",
            active.target, requested
        ));
    }
    Ok(true)
}

/// Shorthand for `init_logging_from` with default rotation.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let settings = LoggingSettings {
        level: level.to_string(),
        dir: Some(log_dir.to_string()),
        ..LoggingSettings::default()
    };
    init_logging_from(&settings).map(|_| ())
}

/// Returns `(level, log_dir)` when file logging is active.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE
        .get()
        .map(|active| (active.target.level, active.target.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn parse_level(level: &str) -> Result<&'static str, String> {
    let normalized = level.trim().to_ascii_lowercase();
    let level = match normalized.as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => {
            return Err(format!(
                "unsupported log level `{normalized}`; expected trace|debug|info|warn|error"
            ))
        }
    };
    Ok(level)
}

fn absolute_dir(dir: &str) -> Result<PathBuf, String> {
    let dir = dir.trim();
    if dir.is_empty() {
        return Err("log dir cannot be empty".to_string());
    }
    let path = Path::new(dir);
    if !path.is_absolute() {
        return Err(format!("log dir must be an absolute path, got `{dir}`"));
    }
    Ok(path.to_path_buf())
}

/// Chains onto the previous hook; called once from logger init.
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map_or_else(|| "unknown".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=panic_captured module=core status=error location={} payload={}",
            location,
            single_line(&payload, PANIC_PAYLOAD_LIMIT)
        );
        previous(info);
    }));
}

/// Newlines flattened, capped at `max_chars`.
fn single_line(value: &str, max_chars: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    let mut capped: String = flat.chars().take(max_chars).collect();
    if flat.chars().count() > max_chars {
        capped.push_str("...");
    }
    capped
}
