//! Configuration
//!
//! Layers, lowest priority first:
//! 1. built-in defaults
//! 2. a TOML file (`cadenza.toml` in the working directory, or the path in
//!    `CADENZA_CONFIG_PATH`, or the path given to the builder)
//! 3. `CADENZA_*` environment variables (a `.env` file is loaded first)
//! 4. explicit overrides passed to [`ConfigBuilder`]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "cadenza.toml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://cadenza.db";

const ENV_PREFIX: &str = "CADENZA";
const CONFIG_PATH_ENV: &str = "CADENZA_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("config file not found: {0}")]
    MissingFile(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    /// How often the SQLite waker polls for due work.
    pub poll_interval_ms: u64,
    /// Default wait for `trigger_and_wait`.
    pub trigger_timeout_ms: u64,
    /// How long a claimed SQLite task stays hidden before it is handed out again.
    pub visibility_timeout_ms: u64,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Config {
    /// Load with the default search rules and no overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_millis(self.trigger_timeout_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be at least 1".into()));
        }
        if self.visibility_timeout_ms == 0 {
            return Err(ConfigError::Invalid("visibility_timeout_ms must be at least 1".into()));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    database_url: Option<String>,
    config_path: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigBuilder {
    pub fn database_url(mut self, database_url: Option<String>) -> Self {
        self.database_url = database_url;
        self
    }

    /// Read this file instead of searching; it must exist.
    pub fn config_path(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self
    }

    /// Ignore `.env` and `CADENZA_*` variables.
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if !self.skip_env {
            dotenvy::dotenv().ok();
        }

        let explicit_path = self.config_path.clone().or_else(|| {
            if self.skip_env {
                None
            } else {
                std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
            }
        });

        let file = match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::MissingFile(path));
                }
                config::File::from(path).required(true)
            }
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut settings = config::Config::builder()
            .set_default("database_url", DEFAULT_DATABASE_URL)?
            .set_default("poll_interval_ms", 10_i64)?
            .set_default("trigger_timeout_ms", 150_000_i64)?
            .set_default("visibility_timeout_ms", 300_000_i64)?
            .set_default("log_level", "info")?
            .add_source(file);

        if !self.skip_env {
            settings = settings.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .ignore_empty(true),
            );
        }

        if let Some(database_url) = self.database_url {
            settings = settings.set_override("database_url", database_url)?;
        }

        let config: Config = settings.build()?.try_deserialize()?;
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("cadenza-{}-{}.toml", name, std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::builder().without_env().build().unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.trigger_timeout(), Duration::from_millis(150_000));
        assert_eq!(config.visibility_timeout(), Duration::from_millis(300_000));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_file_layer_and_override() {
        let path = write_config(
            "layers",
            "database_url = \"sqlite://from-file.db\"\npoll_interval_ms = 25\n",
        );

        let config = Config::builder()
            .without_env()
            .config_path(Some(path.clone()))
            .build()
            .unwrap();
        assert_eq!(config.database_url, "sqlite://from-file.db");
        assert_eq!(config.poll_interval_ms, 25);
        assert_eq!(config.trigger_timeout_ms, 150_000);

        let config = Config::builder()
            .without_env()
            .config_path(Some(path.clone()))
            .database_url(Some("sqlite::memory:".to_string()))
            .build()
            .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::builder()
            .without_env()
            .config_path(Some(PathBuf::from("/definitely/not/here.toml")))
            .build()
            .unwrap_err();

        assert!(matches!(err, ConfigError::MissingFile(_)));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let path = write_config("invalid", "poll_interval_ms = 0\n");

        let err = Config::builder()
            .without_env()
            .config_path(Some(path.clone()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_renders_toml() {
        let config = Config::builder().without_env().build().unwrap();
        let rendered = config.to_toml().unwrap();

        assert!(rendered.contains("database_url = \"sqlite://cadenza.db\""));
        assert!(rendered.contains("trigger_timeout_ms = 150000"));
    }
}
