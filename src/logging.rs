//! Logging infrastructure for DeviceMirror
//!
//! This module sets up structured logging using the tracing crate.
//! Server stdout lines are emitted under the `device_mirror::server` target.

use tracing_subscriber::{fmt, EnvFilter};

/// Log target used for lines printed by the on-device server
pub const SERVER_LOG_TARGET: &str = "device_mirror::server";

/// Log level configuration
#[derive(Debug, Clone, Copy, Default)]
pub enum LogLevel {
    /// Trace level - per-packet detail
    Trace,
    /// Debug level - detailed information
    Debug,
    /// Info level - session lifecycle
    #[default]
    Info,
    /// Warn level - warnings
    Warn,
    /// Error level - errors only
    Error,
}

impl LogLevel {
    /// Converts LogLevel to tracing level filter string
    fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Initializes the logging system
///
/// Sets up tracing subscriber with the specified log level.
/// Can be overridden by RUST_LOG environment variable.
///
/// # Examples
///
/// ```no_run
/// use device_mirror::logging::{init_logging, LogLevel};
///
/// init_logging(LogLevel::Info);
///
/// // Or use RUST_LOG environment variable:
/// // RUST_LOG=device_mirror=trace cargo run
/// ```
pub fn init_logging(level: LogLevel) {
    let default_filter = format!("device_mirror={}", level.as_filter_str());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    // try_init so tests and embedders that already installed a subscriber keep theirs
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

/// Initializes logging with default settings
pub fn init_default_logging() {
    init_logging(LogLevel::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::Trace.as_filter_str(), "trace");
        assert_eq!(LogLevel::Debug.as_filter_str(), "debug");
        assert_eq!(LogLevel::Info.as_filter_str(), "info");
        assert_eq!(LogLevel::Warn.as_filter_str(), "warn");
        assert_eq!(LogLevel::Error.as_filter_str(), "error");
    }

    #[test]
    fn test_default_log_level() {
        assert_eq!(LogLevel::default().as_filter_str(), "info");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(LogLevel::Debug);
        init_default_logging();
    }
}
