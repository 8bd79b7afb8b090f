//! Tracing/logging initialization.
//!
//! `RUST_LOG` always wins over the configured default directive.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-oriented multi-line output for local runs.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = LogConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(LogConfigError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogConfigError {
    #[error("unknown log format: {0}")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    pub default_directive: String,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            default_directive: "info".to_string(),
            with_target: false,
        }
    }
}

impl LogConfig {
    /// Read `KEYWARD_LOG_FORMAT` and `KEYWARD_LOG_LEVEL`.
    pub fn from_env() -> Result<Self, LogConfigError> {
        let defaults = Self::default();
        let format = match std::env::var("KEYWARD_LOG_FORMAT") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.format,
        };
        let default_directive = std::env::var("KEYWARD_LOG_LEVEL").unwrap_or(defaults.default_directive);

        Ok(Self {
            format,
            default_directive,
            with_target: format == LogFormat::Pretty,
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.default_directive))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber described by `config`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with(config: &LogConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(config.with_target);

    let _ = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_is_case_insensitive() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" text ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!(
            "xml".parse::<LogFormat>().unwrap_err(),
            LogConfigError::UnknownFormat("xml".to_string())
        );
    }

    #[test]
    fn from_env_defaults_to_json_info() {
        temp_env::with_vars_unset(["KEYWARD_LOG_FORMAT", "KEYWARD_LOG_LEVEL"], || {
            assert_eq!(LogConfig::from_env().unwrap(), LogConfig::default());
        });
    }

    #[test]
    fn from_env_reads_format_and_level() {
        temp_env::with_vars(
            [
                ("KEYWARD_LOG_FORMAT", Some("pretty")),
                ("KEYWARD_LOG_LEVEL", Some("keyward_auth=debug,warn")),
            ],
            || {
                let config = LogConfig::from_env().unwrap();
                assert_eq!(config.format, LogFormat::Pretty);
                assert_eq!(config.default_directive, "keyward_auth=debug,warn");
                assert!(config.with_target);
            },
        );
    }

    #[test]
    fn bad_format_is_an_error() {
        temp_env::with_var("KEYWARD_LOG_FORMAT", Some("yaml"), || {
            assert!(LogConfig::from_env().is_err());
        });
    }

    #[test]
    fn init_twice_is_harmless() {
        init_with(&LogConfig::default());
        init_with(&LogConfig {
            format: LogFormat::Pretty,
            ..LogConfig::default()
        });
    }
}
