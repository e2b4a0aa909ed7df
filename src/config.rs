//! Layered runtime settings using Figment
//!
//! Settings are resolved from, in increasing priority:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed with `LABCTL_`
//!
//! ```toml
//! log_level = "debug"
//! log_format = "compact"
//! debug_stream = true
//! resource_paths = ["/etc/lab_control/resources"]
//! timeout_ms = 2000
//! bool_format = "one_zero"
//! ```
//!
//! Example: `LABCTL_DEBUG_STREAM=true labctl call ...` turns on the wire trace
//! for one run.
//!
//! The library never reads the environment on its own. Callers resolve a
//! [`Settings`] and hand it to [`InstrumentBuilder::settings`](crate::dispatch::InstrumentBuilder::settings).

use crate::logging::{parse_log_level, OutputFormat};
use crate::registry::BoolFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "LABCTL_";

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,

    /// Emit wire trace records for every instrument
    #[serde(default)]
    pub debug_stream: bool,

    /// Extra directories searched for method resources, in priority order
    #[serde(default)]
    pub resource_paths: Vec<PathBuf>,

    /// Timeout of the default backend in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Boolean convention for resources that declare none
    #[serde(default)]
    pub bool_format: BoolFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
            debug_stream: false,
            resource_paths: Vec::new(),
            timeout_ms: default_timeout_ms(),
            bool_format: BoolFormat::default(),
        }
    }
}

impl Settings {
    /// Figment with all three layers. A missing file is skipped.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        // Flat keys: LABCTL_DEBUG_STREAM maps to `debug_stream`, not `debug.stream`
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Resolve settings from defaults, `path` and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Default backend timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> Result<(), String> {
        parse_log_level(&self.log_level)?;

        if self.timeout_ms == 0 {
            return Err("Invalid timeout_ms 0. Must be greater than zero".to_string());
        }

        for path in &self.resource_paths {
            if path.as_os_str().is_empty() {
                return Err("resource_paths contains an empty path".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    fn clear_env() {
        for key in [
            "LABCTL_LOG_LEVEL",
            "LABCTL_DEBUG_STREAM",
            "LABCTL_TIMEOUT_MS",
            "LABCTL_BOOL_FORMAT",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        clear_env();
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.validate().is_ok());
        assert_eq!(settings.timeout(), Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_file_then_environment() {
        clear_env();
        let dir = tempdir().unwrap();
        let path = dir.path().join("labctl.toml");
        fs::write(
            &path,
            "log_level = \"debug\"\nlog_format = \"json\"\ntimeout_ms = 250\nresource_paths = [\"/opt/res\"]\nbool_format = \"true_false\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.log_format, OutputFormat::Json);
        assert_eq!(settings.timeout_ms, 250);
        assert_eq!(settings.resource_paths, vec![PathBuf::from("/opt/res")]);
        assert_eq!(settings.bool_format, BoolFormat::TrueFalse);
        assert!(!settings.debug_stream);

        std::env::set_var("LABCTL_DEBUG_STREAM", "true");
        std::env::set_var("LABCTL_TIMEOUT_MS", "900");
        let settings = Settings::load(Some(&path)).unwrap();
        clear_env();
        assert!(settings.debug_stream);
        assert_eq!(settings.timeout_ms, 900);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_missing_file_is_skipped() {
        clear_env();
        let settings = Settings::load(Some(Path::new("/nonexistent/labctl.toml"))).unwrap();
        assert_eq!(settings.timeout_ms, 5000);
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.log_level = "chatty".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.timeout_ms = 0;
        assert!(settings.validate().unwrap_err().contains("timeout_ms"));
    }
}
