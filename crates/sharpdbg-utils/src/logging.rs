//! # Logging Utilities
//!
//! Logging infrastructure for sharpdbg using `tracing`.
//!
//! The debugger core only emits `tracing` events; embedders decide where they
//! go. This module wires up a `tracing-subscriber` registry with:
//! - Pretty or JSON output
//! - `RUST_LOG`-style filtering
//! - Optional non-blocking file output
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Filter directives (e.g., `RUST_LOG=debug`, `RUST_LOG=sharpdbg_core::breakpoints=trace`)
//! - `SHARPDBG_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `SHARPDBG_LOG_FILE`: Optional path to a log file written in addition to stdout.
//!   A directory gets a dated `YYYY-MM-DD-sharpdbg.log` file inside it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sharpdbg_utils::init_logging;
//!
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("debugger session started");
//! ```
//!
//! Front ends that speak a protocol over stdout must not log there; they use
//! [`init_logging_to_file`] instead.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "SHARPDBG_LOG_FORMAT";
/// Environment variable naming an additional log file.
pub const LOG_FILE_ENV: &str = "SHARPDBG_LOG_FILE";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default for development)
    Pretty,
    /// JSON format, one event per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the non-blocking file writer alive.
///
/// Buffered file output is flushed when this guard is dropped, so hold it for
/// the lifetime of the debugger session.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging from the environment.
///
/// - `RUST_LOG`: filter directives, default `info`
/// - `SHARPDBG_LOG_FORMAT`: `json` or `pretty`
/// - `SHARPDBG_LOG_FILE`: optional extra file sink
///
/// ## Errors
///
/// Returns an error if the format variable is malformed, the log file cannot
/// be opened, or a global subscriber is already installed.
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var(LOG_FORMAT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::Pretty,
    };
    let log_file = env::var(LOG_FILE_ENV).ok().map(|path| resolve_log_path(PathBuf::from(path)));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));
    install(format, Some(filter.clone()), log_file.as_deref(), filter)
}

/// Initialize logging with an explicit level and format (stdout only).
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    let filter = EnvFilter::new(Level::from(level).to_string());
    install(format, Some(filter.clone()), None, filter)
}

/// Initialize file-only logging.
///
/// Used when stdout carries a protocol stream. `level` takes precedence over
/// `RUST_LOG`; without either, `info` is used. When `path` is a directory the
/// log goes to [`dated_log_file`] inside it. Returns the file written to.
///
/// ## Errors
///
/// Returns an error if the parent directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging_to_file(path: &Path, level: Option<LogLevel>) -> Result<(PathBuf, LoggingGuard), LoggingError>
{
    let path = resolve_log_path(path.to_path_buf());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let filter = match level {
        Some(level) => EnvFilter::new(Level::from(level).to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    };
    let guard = install(LogFormat::Pretty, None, Some(path.as_path()), filter)?;
    Ok((path, guard))
}

/// `<directory>/YYYY-MM-DD-sharpdbg.log` for today (UTC).
#[must_use]
pub fn dated_log_file(directory: &Path) -> PathBuf
{
    let today = Utc::now().format("%Y-%m-%d");
    directory.join(format!("{today}-sharpdbg.log"))
}

fn resolve_log_path(path: PathBuf) -> PathBuf
{
    if path.is_dir() { dated_log_file(&path) } else { path }
}

fn install(
    format: LogFormat,
    console_filter: Option<EnvFilter>,
    log_file: Option<&Path>,
    file_filter: EnvFilter,
) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = LoggingGuard::default();

    if let Some(filter) = console_filter {
        layers.push(console_layer(format, filter));
    }

    if let Some(path) = log_file {
        // Rotation is left to the embedder; the file name is used as given.
        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().ok_or_else(|| {
            LoggingError::InitializationFailed(format!("log path {} has no file name", path.display()))
        })?;
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        guard._file = Some(worker);

        let layer = match format {
            LogFormat::Pretty => fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(false)
                .with_filter(file_filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_current_span(true)
                .with_span_list(true)
                .with_filter(file_filter)
                .boxed(),
        };
        layers.push(layer);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_writer(io::stdout)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stdout)
            .with_filter(filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// A global subscriber was already set, or the sink could not be built.
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("dev").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("prod").unwrap(), LogFormat::Json);
        assert!(matches!(LogFormat::from_str("xml"), Err(LoggingError::InvalidFormat(s)) if s == "xml"));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_directory_log_target_gets_dated_file()
    {
        let directory = env::temp_dir();
        let resolved = resolve_log_path(directory.clone());
        assert_eq!(resolved.parent(), Some(directory.as_path()));
        let name = resolved.file_name().and_then(|n| n.to_str()).unwrap().to_string();
        assert!(name.starts_with(&Utc::now().format("%Y-%m-%d").to_string()));
        assert!(name.ends_with("-sharpdbg.log"));

        let file = directory.join("sharpdbg-missing-dir").join("session.log");
        assert_eq!(resolve_log_path(file.clone()), file);
    }

    #[test]
    fn test_invalid_level_message_lists_choices()
    {
        let message = LoggingError::InvalidLevel("loud".into()).to_string();
        assert!(message.contains("loud"));
        assert!(message.contains("'trace'"));
    }
}
