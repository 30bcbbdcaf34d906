//! # sharpdbg Utilities
//!
//! Shared utilities, logging, and config helpers for sharpdbg.
//!
//! The core crate only emits `tracing` events and reads its options through
//! [`config`]; this crate owns subscriber setup so every embedder configures the
//! debugger the same way.

pub mod config;
pub mod logging;

pub use config::{env_flag, parse_flag, ConfigError};
pub use logging::{dated_log_file, init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard};
