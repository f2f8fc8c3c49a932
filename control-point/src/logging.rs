//! Logging setup for applications embedding the control point
//!
//! The library itself only emits `tracing` events; this module offers a ready
//! subscriber for binaries that do not install their own.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber is installed
    Silent,
    /// Compact stderr output, `info` by default
    Development,
    /// Verbose diagnostics with source locations, `debug` by default
    Debug,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter {0:?}")]
    InvalidFilter(String),
}

/// Initialize logging with the specified mode
///
/// # Environment Variables
///
/// - `UPNP_CP_LOG_LEVEL`: override the level (error, warn, info, debug, trace)
/// - `UPNP_CP_LOG_TARGET`: restrict output to one target, e.g.
///   `upnp_control_point::connection`
/// - `RUST_LOG`: used when `UPNP_CP_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `UPNP_CP_LOG_MODE` (`silent`, `development` or
/// `debug`). Defaults to silent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = std::env::var("UPNP_CP_LOG_MODE")
        .ok()
        .and_then(|m| parse_mode(&m))
        .unwrap_or(LoggingMode::Silent);
    init_logging(mode)
}

fn parse_mode(value: &str) -> Option<LoggingMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "silent" => Some(LoggingMode::Silent),
        "development" | "dev" => Some(LoggingMode::Development),
        "debug" => Some(LoggingMode::Debug),
        _ => None,
    }
}

fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let level = std::env::var("UPNP_CP_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    let directive = match std::env::var("UPNP_CP_LOG_TARGET") {
        Ok(target) if !target.trim().is_empty() => format!("{}={}", target.trim(), level),
        _ => level,
    };

    EnvFilter::try_new(&directive).map_err(|_| LoggingError::InvalidFilter(directive))
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
