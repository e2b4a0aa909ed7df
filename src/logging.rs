//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; binaries and test harnesses
//! decide where they go. Wire trace records are emitted at `debug` on the
//! [`WIRE_TARGET`](crate::instrument::WIRE_TARGET) target, so enabling
//! `debug_stream` in [`Settings`] also lets that target through the filter
//! regardless of the global level.
//!
//! # Example
//! ```no_run
//! use lab_control::config::Settings;
//! use lab_control::logging;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(None)?;
//! logging::init_from_settings(&settings)?;
//! tracing::info!("labctl started");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use crate::instrument::WIRE_TARGET;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured output for development
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// JSON objects for log aggregation
    Json,
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Maximum level for all targets
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Let wire trace records through even above `level`
    pub wire_trace: bool,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include thread names
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (Pretty format only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            wire_trace: false,
            with_file_and_line: false,
            with_thread_names: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Config at `level` with default options
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Config from resolved [`Settings`]
    pub fn from_settings(settings: &Settings) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&settings.log_level)?,
            format: settings.log_format,
            wire_trace: settings.debug_stream,
            ..Default::default()
        })
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable the wire trace directive
    pub fn with_wire_trace(mut self, enabled: bool) -> Self {
        self.wire_trace = enabled;
        self
    }

    /// Enable or disable file and line numbers
    pub fn with_file_and_line(mut self, enabled: bool) -> Self {
        self.with_file_and_line = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// Filter directives used when `RUST_LOG` is not set.
    pub fn filter_directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        if self.wire_trace {
            format!("{level},{WIRE_TARGET}=debug")
        } else {
            level
        }
    }
}

/// Initialize tracing from [`Settings`]
pub fn init_from_settings(settings: &Settings) -> Result<(), String> {
    init(TracingConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this when a
/// subscriber is already installed is not an error, so tests and embedding
/// applications can call it freely.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            // Expected in tests and when a host application owns the subscriber
            if e.to_string().contains("already been set") {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {e}"))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("WARN"), Ok(Level::WARN)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_wire_trace_adds_target_directive() {
        let config = TracingConfig::new(Level::WARN);
        assert_eq!(config.filter_directives(), "warn");
        let config = config.with_wire_trace(true);
        assert_eq!(config.filter_directives(), "warn,lab_control::wire=debug");
    }

    #[test]
    fn test_from_settings() {
        let settings = Settings {
            log_level: "error".into(),
            log_format: OutputFormat::Json,
            debug_stream: true,
            ..Settings::default()
        };
        let config = TracingConfig::from_settings(&settings).unwrap();
        assert!(matches!(config.level, Level::ERROR));
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.wire_trace);

        let bad = Settings {
            log_level: "loud".into(),
            ..Settings::default()
        };
        assert!(TracingConfig::from_settings(&bad).is_err());
    }
}
