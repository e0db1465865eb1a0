//! Structured logging settings.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Environment variable holding the log filter.
pub const ENV_LOG: &str = "PROMPTVAULT_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; anything but `json` is pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when no environment filter is set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds a logging config from the config file section.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>) -> Self {
        let mut config = Self::default();
        let Some(settings) = settings else {
            return config;
        };
        if let Some(level) = settings.level.as_deref().filter(|l| !l.trim().is_empty()) {
            config.level = level.trim().to_string();
        }
        if let Some(format) = &settings.format {
            config.format = LogFormat::parse(format);
        }
        config.file.clone_from(&settings.file);
        config
    }

    /// Builds the event filter: `PROMPTVAULT_LOG`, then `RUST_LOG`, then
    /// the configured level.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        self.filter_from(|key| std::env::var(key).ok())
    }

    fn filter_from(&self, lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
        [ENV_LOG, "RUST_LOG"]
            .into_iter()
            .filter_map(&lookup)
            .find_map(|directive| EnvFilter::try_new(directive).ok())
            .or_else(|| EnvFilter::try_new(&self.level).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}
