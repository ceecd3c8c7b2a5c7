//! Engine tuning knobs, loadable from a YAML file.
//!
//! Everything has a default; a missing file section or an absent file are
//! both fine. Durations are plain seconds in the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// Fallback bound for every wait the engine performs, in seconds.
pub const DEFAULT_TIMEOUT: f64 = 20.0;

/// Scheduler tick of the main loop, in seconds.
pub const DEFAULT_HEARTBEAT: f64 = 0.001;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config field {field}: {value} (must be positive and finite)")]
    InvalidField { field: &'static str, value: f64 },
}

/// Timing configuration of one execution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Deadline for each issued command future, in seconds.
    pub default_timeout: f64,
    /// Main-loop tick, in seconds. Commands run at most this late.
    pub heartbeat: f64,
    /// Bound on the open fan-out, in seconds.
    pub open_timeout: f64,
    /// Bound on the setup fan-out, in seconds.
    pub setup_timeout: f64,
    /// Bound on the close fan-out, in seconds.
    pub close_timeout: f64,
    /// Bound on the logging acceptance wait, in seconds.
    pub logging_begin_timeout: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            heartbeat: DEFAULT_HEARTBEAT,
            open_timeout: DEFAULT_TIMEOUT,
            setup_timeout: DEFAULT_TIMEOUT,
            close_timeout: DEFAULT_TIMEOUT,
            logging_begin_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ExecutionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("default_timeout", self.default_timeout),
            ("heartbeat", self.heartbeat),
            ("open_timeout", self.open_timeout),
            ("setup_timeout", self.setup_timeout),
            ("close_timeout", self.close_timeout),
            ("logging_begin_timeout", self.logging_begin_timeout),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidField { field, value });
            }
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.default_timeout)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.open_timeout)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.setup_timeout)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.close_timeout)
    }

    pub fn logging_begin_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.logging_begin_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_apply_for_missing_fields() {
        let config = ExecutionConfig::from_yaml_str("heartbeat: 0.01\n").unwrap();
        assert_eq!(config.heartbeat, 0.01);
        assert_eq!(config.default_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.open_timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(ExecutionConfig::from_yaml_str("hartbeat: 0.01\n").is_err());
    }

    #[test]
    fn test_non_positive_values_are_rejected() {
        let err = ExecutionConfig::from_yaml_str("close_timeout: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField { field: "close_timeout", .. }
        ));
        assert!(ExecutionConfig::from_yaml_str("heartbeat: .nan\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_timeout: 5.0").unwrap();
        let config = ExecutionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_timeout, 5.0);
        assert_eq!(config.default_timeout(), Duration::from_secs(5));

        let err = ExecutionConfig::from_file("/nonexistent/rigrun.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
