//! Migration configuration.
//!
//! Loaded from `qail-migrate.toml` in the working directory, or from
//! `<config dir>/qail/migrate.toml` when that file is absent:
//!
//! ```toml
//! changelog = "migrations/changelog.xml"
//! lock = false
//!
//! [connections.development]
//! url = "postgres://localhost/app_development"
//!
//! [connections.test]
//! url = "env:TEST_DATABASE_URL"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MigrateError, MigrateResult};
use crate::parser::DEFAULT_CHANGELOG;

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "qail-migrate.toml";

/// Profile used when none is given.
pub const DEFAULT_CONNECTION: &str = "development";

/// Profile used by the pre-test hook.
pub const TEST_CONNECTION: &str = "test";

/// Top-level configuration handed to the migrator.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrateConfig {
    /// Changelog path.
    #[serde(default = "default_changelog")]
    pub changelog: PathBuf,

    /// Hold the ledger lock for the duration of a run.
    #[serde(default)]
    pub lock: bool,

    /// Named connection profiles.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionProfile>,
}

fn default_changelog() -> PathBuf {
    PathBuf::from(DEFAULT_CHANGELOG)
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            changelog: default_changelog(),
            lock: false,
            connections: HashMap::new(),
        }
    }
}

/// A named database connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionProfile {
    /// Connection URL, or `env:VAR` to read it from the environment.
    pub url: String,
}

impl ConnectionProfile {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The URL to connect to, with `env:` indirection resolved.
    pub fn resolve_url(&self) -> MigrateResult<String> {
        match self.url.strip_prefix("env:") {
            Some(var) => std::env::var(var).map_err(|_| {
                MigrateError::Config(format!("environment variable {} is not set", var))
            }),
            None => Ok(self.url.clone()),
        }
    }
}

impl MigrateConfig {
    /// Create a new configuration builder.
    pub fn builder() -> MigrateConfigBuilder {
        MigrateConfigBuilder::default()
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> MigrateResult<Self> {
        toml::from_str(content).map_err(|e| MigrateError::Config(e.to_string()))
    }

    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;
        Self::from_toml(&content)
    }

    /// Load from the first config file found.
    ///
    /// Looks in the working directory, then the user config directory.
    pub fn discover() -> MigrateResult<Self> {
        Self::locate(None, Path::new("."))?.ok_or_else(|| {
            MigrateError::Config(format!(
                "{} not found. Create it or pass --config",
                CONFIG_FILE
            ))
        })
    }

    /// Load `explicit` if given, otherwise the first config file found from
    /// `dir`.
    ///
    /// `Ok(None)` only when nothing was given and no file exists. A file
    /// that exists but does not load is always an error.
    pub fn locate(explicit: Option<&Path>, dir: &Path) -> MigrateResult<Option<Self>> {
        if let Some(path) = explicit {
            return Self::from_file(path).map(Some);
        }

        let local = dir.join(CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local).map(Some);
        }

        if let Some(global) = dirs::config_dir().map(|d| d.join("qail").join("migrate.toml")) {
            if global.exists() {
                return Self::from_file(global).map(Some);
            }
        }

        Ok(None)
    }

    /// Look up a connection profile by name.
    pub fn connection(&self, name: &str) -> MigrateResult<&ConnectionProfile> {
        self.connections
            .get(name)
            .ok_or_else(|| MigrateError::ConnectionNotFound(name.to_string()))
    }
}

/// Builder for MigrateConfig.
#[derive(Debug, Default)]
pub struct MigrateConfigBuilder {
    config: MigrateConfig,
}

impl MigrateConfigBuilder {
    /// Set the changelog path.
    pub fn changelog(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.changelog = path.into();
        self
    }

    /// Enable or disable the ledger lock.
    pub fn lock(mut self, enabled: bool) -> Self {
        self.config.lock = enabled;
        self
    }

    /// Add a connection profile.
    pub fn connection(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.config
            .connections
            .insert(name.into(), ConnectionProfile::new(url));
        self
    }

    /// Build the configuration.
    pub fn build(self) -> MigrateConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml() {
        let config = MigrateConfig::from_toml(
            r#"
            lock = true

            [connections.development]
            url = "postgres://localhost/app_development"

            [connections.test]
            url = "postgres://localhost/app_test"
            "#,
        )
        .unwrap();

        assert!(config.lock);
        assert_eq!(config.changelog, PathBuf::from("migrations/changelog.xml"));
        assert_eq!(
            config.connection("test").unwrap().url,
            "postgres://localhost/app_test"
        );
    }

    #[test]
    fn test_unknown_connection() {
        let config = MigrateConfig::default();
        let err = config.connection("staging").unwrap_err();
        assert!(matches!(err, MigrateError::ConnectionNotFound(name) if name == "staging"));
    }

    #[test]
    fn test_invalid_toml() {
        let err = MigrateConfig::from_toml("connections = 3").unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = MigrateConfig::builder()
            .changelog("db/changelog.xml")
            .connection("development", "postgres://localhost/dev")
            .build();

        assert_eq!(config.changelog, PathBuf::from("db/changelog.xml"));
        assert!(!config.lock);
        assert!(config.connection("development").is_ok());
    }

    #[test]
    fn test_env_url() {
        let profile = ConnectionProfile::new("env:QAIL_MIGRATE_SURELY_UNSET_VAR");
        assert!(matches!(profile.resolve_url(), Err(MigrateError::Config(_))));

        let plain = ConnectionProfile::new("postgres://localhost/app");
        assert_eq!(plain.resolve_url().unwrap(), "postgres://localhost/app");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "changelog = \"db/changelog.xml\"\n").unwrap();

        let config = MigrateConfig::from_file(&path).unwrap();
        assert_eq!(config.changelog, PathBuf::from("db/changelog.xml"));
        assert!(config.connections.is_empty());
    }

    #[test]
    fn test_locate_explicit_malformed_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "changelog = [1,2").unwrap();

        let err = MigrateConfig::locate(Some(&path), dir.path()).unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_locate_explicit_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nowhere.toml");

        let err = MigrateConfig::locate(Some(&path), dir.path()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_locate_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "changelog = \"db/changelog.xml\"\n",
        )
        .unwrap();

        let config = MigrateConfig::locate(None, dir.path()).unwrap().unwrap();
        assert_eq!(config.changelog, PathBuf::from("db/changelog.xml"));
    }

    #[test]
    fn test_locate_local_malformed_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "changelog = [1,2").unwrap();

        let err = MigrateConfig::locate(None, dir.path()).unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}
