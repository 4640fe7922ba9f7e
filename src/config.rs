use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default bound on the global history stack.
pub const DEFAULT_MAX_HISTORY: usize = 500;

pub const ENV_MAX_HISTORY: &str = "GMS_HISTORY_MAX";
pub const ENV_HISTORY_DEBUG: &str = "GMS_HISTORY_DEBUG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("max-history must be at least 1")]
    ZeroMaxHistory,
}

/// Tunables for the history engine.
///
/// Every field has a default, so an empty TOML document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HistoryConfig {
    /// Retention bound for the global stack; the oldest transaction is evicted beyond it.
    pub max_history: usize,
    /// Re-check captured patches and global boundaries after every operation.
    pub validate_captures: bool,
    /// `tracing` filter directive used by the binary when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            validate_captures: false,
            log_filter: "info".to_string(),
        }
    }
}

impl HistoryConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Applies `GMS_HISTORY_MAX` / `GMS_HISTORY_DEBUG` on top of the file values.
    ///
    /// Unparseable values are ignored rather than rejected.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        let max = env::var(ENV_MAX_HISTORY).ok();
        let debug = env::var(ENV_HISTORY_DEBUG).ok();
        self.with_overrides(max.as_deref(), debug.as_deref())
    }

    fn with_overrides(mut self, max: Option<&str>, debug: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(max) = max.and_then(|v| v.trim().parse::<usize>().ok()) {
            self.max_history = max;
        }
        if let Some(debug) = debug {
            self.validate_captures = matches!(debug.trim(), "1" | "true" | "TRUE" | "yes");
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_history == 0 {
            return Err(ConfigError::ZeroMaxHistory);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_uses_defaults() {
        let config = HistoryConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(config, HistoryConfig::default());
        assert_eq!(config.max_history, 500);
    }

    #[test]
    fn kebab_case_fields_are_read() {
        let config = HistoryConfig::from_toml_str(
            "max-history = 3\nvalidate-captures = true\nlog-filter = \"debug\"\n",
        )
        .expect("config parses");
        assert_eq!(config.max_history, 3);
        assert!(config.validate_captures);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn zero_max_history_is_rejected() {
        let err = HistoryConfig::from_toml_str("max-history = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroMaxHistory));
    }

    #[test]
    fn overrides_replace_file_values() {
        let config = HistoryConfig::default()
            .with_overrides(Some("42"), Some("true"))
            .expect("overrides apply");
        assert_eq!(config.max_history, 42);
        assert!(config.validate_captures);

        let untouched = HistoryConfig::default()
            .with_overrides(Some("not-a-number"), None)
            .expect("bad value ignored");
        assert_eq!(untouched.max_history, DEFAULT_MAX_HISTORY);
    }
}
