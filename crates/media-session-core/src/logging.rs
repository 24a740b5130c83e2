//! Subscriber setup for applications embedding the media session core.
//!
//! The library itself only emits `tracing` events; nothing here runs unless
//! the application asks for it.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Maximum level when `RUST_LOG` does not say otherwise
    pub level: Level,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
    /// Include file and line information
    pub file_info: bool,
    /// Log span open/close events
    pub log_spans: bool,
    /// Application name logged at startup
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "media-session".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        Self { level, app_name: app_name.into(), ..Default::default() }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Build a filter from `RUST_LOG`, defaulting to the configured level
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(self.level.into()))
    }
}

/// Install a global `fmt` subscriber. Fails if one is already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let span_events = if config.log_spans { FmtSpan::ACTIVE } else { FmtSpan::NONE };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter())
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::config(format!("failed to install log subscriber: {}", e)))?;

    tracing::info!(app = %config.app_name, version = env!("CARGO_PKG_VERSION"), "logging initialized");
    Ok(())
}

/// Parse a log level name such as `"debug"` or `"WARN"`
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::config(format!("invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("chatty"), Err(Error::Config { .. })));
    }

    #[test]
    fn test_builder_flags() {
        let config = LoggingConfig::new(Level::TRACE, "softphone").with_json().with_file_info().with_spans();
        assert_eq!(config.level, Level::TRACE);
        assert_eq!(config.app_name, "softphone");
        assert!(config.json && config.file_info && config.log_spans);
    }

    // The only test in this binary that installs the global subscriber
    #[test]
    fn test_setup_logging_installs_once() {
        let config = LoggingConfig::new(Level::DEBUG, "media-session-test").with_file_info();
        setup_logging(&config).unwrap();
        tracing::debug!("subscriber is live");

        let err = setup_logging(&config.clone().with_json()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
