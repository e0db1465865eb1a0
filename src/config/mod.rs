//! Configuration management.
//!
//! A [`VaultConfig`] is built from defaults, then an optional TOML file,
//! then `PROMPTVAULT_*` environment variables (a `.env` file in the working
//! directory is honoured).
//!
//! ```toml
//! root = "~/prompts"
//! sync_concurrency = 8
//! sync_on_open = true
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! file = "/tmp/promptvault.log"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Environment variable overriding the library root.
pub const ENV_ROOT: &str = "PROMPTVAULT_ROOT";
/// Environment variable overriding the database path.
pub const ENV_DB: &str = "PROMPTVAULT_DB";
/// Environment variable overriding the sync concurrency.
pub const ENV_SYNC_CONCURRENCY: &str = "PROMPTVAULT_SYNC_CONCURRENCY";

/// Default number of files reconciled at once.
pub const DEFAULT_SYNC_CONCURRENCY: usize = 10;

/// File name of the index database inside the root.
const DB_FILE_NAME: &str = "index.db";

/// Main configuration for a prompt library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Library root; relative paths below resolve against it.
    pub root: PathBuf,
    /// Prompts directory. Defaults to `{root}/prompts`.
    pub prompts_dir: Option<PathBuf>,
    /// Archive directory. Defaults to `{prompts_dir}/.archive`.
    pub archive_dir: Option<PathBuf>,
    /// Index database. Defaults to `{root}/index.db`.
    pub db_path: Option<PathBuf>,
    /// Files reconciled at once during a full sync.
    pub sync_concurrency: usize,
    /// Run a full sync when the vault is opened.
    pub sync_on_open: bool,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Logging section of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, such as `info` or `promptvault=debug`.
    pub level: Option<String>,
    /// Output format: `pretty` or `json`.
    pub format: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Library root.
    pub root: Option<String>,
    /// Prompts directory.
    pub prompts_dir: Option<String>,
    /// Archive directory.
    pub archive_dir: Option<String>,
    /// Index database.
    pub db_path: Option<String>,
    /// Sync concurrency.
    pub sync_concurrency: Option<usize>,
    /// Sync on open.
    pub sync_on_open: Option<bool>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        let root = directories::BaseDirs::new().map_or_else(
            || PathBuf::from(".promptvault"),
            |dirs| dirs.data_dir().join("promptvault"),
        );
        Self {
            root,
            prompts_dir: None,
            archive_dir: None,
            db_path: None,
            sync_concurrency: DEFAULT_SYNC_CONCURRENCY,
            sync_on_open: false,
            logging: LoggingSettings::default(),
        }
    }
}

impl VaultConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the default config file, then applies `.env` and environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment override has an invalid value.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::load_default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::io("read_config_file", path, &e))?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/promptvault/` on macOS)
    /// 2. XDG config dir (`~/.config/promptvault/`)
    ///
    /// Returns defaults if no readable config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("promptvault").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("promptvault")
                .join("config.toml"),
        ];
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                },
            }
        }

        Self::default()
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(root) = file.root {
            config.root = expand_home(&root);
        }
        config.prompts_dir = file.prompts_dir.as_deref().map(expand_home);
        config.archive_dir = file.archive_dir.as_deref().map(expand_home);
        config.db_path = file.db_path.as_deref().map(expand_home);
        if let Some(n) = file.sync_concurrency {
            config.sync_concurrency = n.max(1);
        }
        if let Some(sync_on_open) = file.sync_on_open {
            config.sync_on_open = sync_on_open;
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        config
    }

    /// Applies `PROMPTVAULT_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the concurrency is not a
    /// positive integer.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup(ENV_ROOT).filter(|v| !v.is_empty()) {
            self.root = expand_home(&root);
        }
        if let Some(db) = lookup(ENV_DB).filter(|v| !v.is_empty()) {
            self.db_path = Some(expand_home(&db));
        }
        if let Some(raw) = lookup(ENV_SYNC_CONCURRENCY) {
            self.sync_concurrency = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| Error::OperationFailed {
                    operation: "parse_env".to_string(),
                    cause: format!("{ENV_SYNC_CONCURRENCY} must be a positive integer, got '{raw}'"),
                })?;
        }
        Ok(())
    }

    /// Sets the library root.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Sets the sync concurrency.
    #[must_use]
    pub fn with_sync_concurrency(mut self, n: usize) -> Self {
        self.sync_concurrency = n.max(1);
        self
    }

    /// Enables or disables the sync on open.
    #[must_use]
    pub const fn with_sync_on_open(mut self, enabled: bool) -> Self {
        self.sync_on_open = enabled;
        self
    }

    /// Resolved prompts directory.
    #[must_use]
    pub fn prompts_dir(&self) -> PathBuf {
        self.prompts_dir
            .as_ref()
            .map_or_else(|| self.root.join("prompts"), |p| self.root.join(p))
    }

    /// Resolved archive directory.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.archive_dir.as_ref().map_or_else(
            || self.prompts_dir().join(crate::storage::document::ARCHIVE_DIR_NAME),
            |p| self.root.join(p),
        )
    }

    /// Resolved database path.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .as_ref()
            .map_or_else(|| self.root.join(DB_FILE_NAME), |p| self.root.join(p))
    }
}

/// Expands a leading `~/` to the home directory.
fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(dirs) = directories::BaseDirs::new()
    {
        return dirs.home_dir().join(rest);
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_resolved_paths() {
        let config = VaultConfig::new().with_root("/lib");
        assert_eq!(config.prompts_dir(), PathBuf::from("/lib/prompts"));
        assert_eq!(config.archive_dir(), PathBuf::from("/lib/prompts/.archive"));
        assert_eq!(config.db_path(), PathBuf::from("/lib/index.db"));
    }

    #[test]
    fn test_relative_overrides_resolve_against_root() {
        let mut config = VaultConfig::new().with_root("/lib");
        config.prompts_dir = Some(PathBuf::from("p"));
        config.db_path = Some(PathBuf::from("/abs/db.sqlite"));
        assert_eq!(config.prompts_dir(), PathBuf::from("/lib/p"));
        assert_eq!(config.archive_dir(), PathBuf::from("/lib/p/.archive"));
        assert_eq!(config.db_path(), PathBuf::from("/abs/db.sqlite"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "root = \"/data\"\nsync_concurrency = 4\nsync_on_open = true\n\n\
             [logging]\nlevel = \"debug\"\nformat = \"json\"\n",
        )
        .unwrap();

        let config = VaultConfig::load_from_file(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/data"));
        assert_eq!(config.sync_concurrency, 4);
        assert!(config.sync_on_open);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.logging.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_load_from_file_rejects_bad_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sync_concurrency = \"many\"").unwrap();
        assert!(matches!(
            VaultConfig::load_from_file(&path),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = VaultConfig::load_from_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, Error::StorageIo { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ROOT, "/env-root"),
            (ENV_DB, "/env/db.sqlite"),
            (ENV_SYNC_CONCURRENCY, "3"),
        ]
        .into_iter()
        .collect();

        let mut config = VaultConfig::new();
        config
            .apply_overrides(|k| env.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.root, PathBuf::from("/env-root"));
        assert_eq!(config.db_path(), PathBuf::from("/env/db.sqlite"));
        assert_eq!(config.sync_concurrency, 3);
    }

    #[test]
    fn test_invalid_concurrency_override() {
        let mut config = VaultConfig::new();
        let result = config.apply_overrides(|k| (k == ENV_SYNC_CONCURRENCY).then(|| "0".to_string()));
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
        assert_eq!(config.sync_concurrency, DEFAULT_SYNC_CONCURRENCY);
    }
}
