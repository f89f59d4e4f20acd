//! Configuration - `mariner.yaml` loading and validation
//!
//! Every section rejects unknown keys so a misspelled setting fails the load
//! instead of silently falling back to its default.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MigrateError, MigrateResult};

static TABLE_IDENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
});

pub(crate) fn is_valid_table_name(name: &str) -> bool {
    TABLE_IDENT.is_match(name)
}

/// Migration configuration, usually loaded from `mariner.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrateConfig {
    /// Directory where migration files are stored
    pub directory: PathBuf,
    /// Enabled dialect plugins, by name
    pub plugins: Vec<String>,
    /// Halt a run after the first migration that reports a warning
    pub stop_on_warning: bool,
    /// Table name for tracking migrations
    pub migrations_table: String,
    pub checksum_policy: ChecksumPolicy,
    pub lock: LockConfig,
    pub database: DatabaseConfig,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
            plugins: vec!["sql".to_string(), "yaml".to_string()],
            stop_on_warning: true,
            migrations_table: "mariner_migrations".to_string(),
            checksum_policy: ChecksumPolicy::Warn,
            lock: LockConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// What to do when an applied migration's file no longer matches its checksum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Report the mismatch and continue
    #[default]
    Warn,
    /// Abort the run before anything executes
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Wait for a held lock instead of failing immediately
    pub wait: bool,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait: false,
            timeout_secs: 30,
            poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Environment variable holding the connection URL
    pub url_env: String,
    /// Explicit connection URL, takes precedence over `url_env`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: "DATABASE_URL".to_string(),
            url: None,
        }
    }
}

/// How the lock manager behaves when another run holds the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    FailFast,
    Wait { timeout: Duration, poll_interval: Duration },
}

impl MigrateConfig {
    pub fn load(path: &Path) -> MigrateResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: MigrateConfig = serde_yaml::from_str(&content).map_err(|e| {
            MigrateError::config(format!("Invalid configuration in {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("mariner.yaml")
    }

    /// Resolve `directory` against the directory holding the config file
    pub fn relative_to(mut self, base: &Path) -> Self {
        if self.directory.is_relative() {
            self.directory = base.join(&self.directory);
        }
        self
    }

    pub fn validate(&self) -> MigrateResult<()> {
        if self.plugins.is_empty() {
            return Err(MigrateError::config("No dialect plugins are enabled"));
        }
        if !is_valid_table_name(&self.migrations_table) {
            return Err(MigrateError::config(format!(
                "Invalid migrations table name '{}'",
                self.migrations_table
            )));
        }
        if self.lock.wait && self.lock.poll_interval_ms == 0 {
            return Err(MigrateError::config(
                "lock.poll_interval_ms must be positive when lock.wait is enabled",
            ));
        }
        Ok(())
    }

    pub fn lock_mode(&self) -> LockMode {
        if self.lock.wait {
            LockMode::Wait {
                timeout: Duration::from_secs(self.lock.timeout_secs),
                poll_interval: Duration::from_millis(self.lock.poll_interval_ms),
            }
        } else {
            LockMode::FailFast
        }
    }

    pub fn database_url(&self) -> MigrateResult<String> {
        if let Some(url) = &self.database.url {
            return Ok(url.clone());
        }
        std::env::var(&self.database.url_env).map_err(|_| {
            MigrateError::config(format!(
                "No database URL configured; set {} or database.url",
                self.database.url_env
            ))
        })
    }

    /// Serialize the configuration as the default `mariner.yaml` contents
    pub fn to_yaml(&self) -> MigrateResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MigrateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_mode(), LockMode::FailFast);
        assert!(config.stop_on_warning);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: MigrateConfig = serde_yaml::from_str(
            "directory: db/migrations\nplugins: [sql]\nchecksum_policy: error\nlock:\n  wait: true\n",
        )
        .unwrap();

        assert_eq!(config.directory, PathBuf::from("db/migrations"));
        assert_eq!(config.plugins, vec!["sql".to_string()]);
        assert_eq!(config.checksum_policy, ChecksumPolicy::Error);
        assert_eq!(config.migrations_table, "mariner_migrations");
        assert_eq!(
            config.lock_mode(),
            LockMode::Wait {
                timeout: Duration::from_secs(30),
                poll_interval: Duration::from_millis(250),
            }
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = MigrateConfig::default();
        config.plugins.clear();
        assert!(matches!(config.validate(), Err(MigrateError::Configuration(_))));

        let mut config = MigrateConfig::default();
        config.migrations_table = "migrations; DROP TABLE users".to_string();
        assert!(matches!(config.validate(), Err(MigrateError::Configuration(_))));

        let mut config = MigrateConfig::default();
        config.migrations_table = "public.schema_log".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_url_wins() {
        let mut config = MigrateConfig::default();
        config.database.url_env = "MARINER_TEST_UNSET_URL_VAR".to_string();
        assert!(config.database_url().is_err());

        config.database.url = Some("postgres://localhost/app".to_string());
        assert_eq!(config.database_url().unwrap(), "postgres://localhost/app");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mariner.yaml");
        std::fs::write(&path, MigrateConfig::default().to_yaml().unwrap()).unwrap();

        let config = MigrateConfig::load(&path).unwrap().relative_to(dir.path());
        assert_eq!(config.directory, dir.path().join("migrations"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mariner.yaml");

        std::fs::write(&path, "stopOnWarning: false
checksum_polcy: error
").unwrap();
        let err = MigrateConfig::load(&path).unwrap_err();
        assert!(matches!(err, MigrateError::Configuration(ref msg) if msg.contains("stopOnWarning")));
        assert_eq!(err.kind(), "ConfigurationError");

        std::fs::write(&path, "lock:
  wiat: true
").unwrap();
        assert!(matches!(
            MigrateConfig::load(&path),
            Err(MigrateError::Configuration(_))
        ));

        std::fs::write(&path, "database:
  uri: postgres://localhost/app
").unwrap();
        assert!(matches!(
            MigrateConfig::load(&path),
            Err(MigrateError::Configuration(_))
        ));
    }
}
