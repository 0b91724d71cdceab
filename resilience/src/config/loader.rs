use crate::config::error::{ConfigError, Result};
use crate::config::validator::validate;
use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::retry::{CircuitBreakerConfig, RetryConfig};
use config::{Config, Environment as EnvSource, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "SOLEBOX";

/// Deployment environment; development enables console output and stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
    Test,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

/// Root configuration for the resilience core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub environment: Environment,

    /// Structured logger settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Default breaker settings for every dependency
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-dependency breaker overrides (dependency name → settings)
    #[serde(default)]
    pub circuit_breakers: HashMap<String, CircuitBreakerConfig>,

    /// Database query metrics
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ResilienceConfig {
    /// Breaker settings for `dependency`: the override if one exists, else the default.
    pub fn breaker_for(&self, dependency: &str) -> CircuitBreakerConfig {
        self.circuit_breakers
            .get(dependency)
            .cloned()
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }

    /// Whether log entries are echoed to the console.
    pub fn console_logging(&self) -> bool {
        self.logging
            .console
            .unwrap_or_else(|| self.environment.is_development())
    }
}

/// Builds a [`ResilienceConfig`] from defaults, an optional file and the environment.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this file as the middle layer; it must exist.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Merge every layer, deserialize, then validate.
    pub fn load(&self) -> Result<ResilienceConfig> {
        // Defaults go in as a JSON source so partial files only override what they name.
        let defaults = serde_json::to_string(&ResilienceConfig::default())?;
        let mut builder =
            Config::builder().add_source(File::from_str(&defaults, FileFormat::Json));

        if let Some(path) = &self.config_path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            builder = builder.add_source(File::from(path.as_path()));
        }

        // SOLEBOX_RETRY__MAX_RETRIES=5 -> retry.max_retries
        builder = builder.add_source(
            EnvSource::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: ResilienceConfig = builder.build()?.try_deserialize()?;
        validate(&config)?;
        tracing::debug!(
            environment = ?config.environment,
            file = ?self.config_path,
            "configuration loaded"
        );
        Ok(config)
    }

    /// First existing file among `./solebox.toml`, `<config dir>/solebox/config.toml`
    /// and `~/.solebox.toml`.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            Some(PathBuf::from("./solebox.toml")),
            dirs::config_dir().map(|dir| dir.join("solebox").join("config.toml")),
            dirs::home_dir().map(|dir| dir.join(".solebox.toml")),
        ];
        candidates.into_iter().flatten().find(|path| path.exists())
    }

    /// Load with whichever default file exists, if any.
    pub fn load_default() -> Result<ResilienceConfig> {
        let loader = match Self::find_config_file() {
            Some(path) => Self::new().with_file(path),
            None => Self::new(),
        };
        loader.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("solebox.toml");
        std::fs::write(&config_path, content).expect("Failed to write temp file");
        (temp_dir, config_path)
    }

    #[test]
    fn test_default_config() {
        let config = ResilienceConfig::default();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.logging.buffer_capacity, 100);
        assert_eq!(config.metrics.capacity, 100);
        assert!(!config.console_logging());
    }

    #[test]
    #[serial]
    fn test_load_with_defaults_only() {
        let config = ConfigLoader::new().load().expect("Failed to load default config");
        assert_eq!(config.retry.initial_delay_ms, 100);
        assert_eq!(config.circuit_breaker.timeout_ms, 30_000);
    }

    #[test]
    #[serial]
    fn test_load_with_env_override() {
        unsafe {
            env::set_var("SOLEBOX_ENVIRONMENT", "development");
            env::set_var("SOLEBOX_RETRY__MAX_RETRIES", "5");
        }

        let config = ConfigLoader::new().load().expect("Failed to load config");

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.console_logging());

        unsafe {
            env::remove_var("SOLEBOX_ENVIRONMENT");
            env::remove_var("SOLEBOX_RETRY__MAX_RETRIES");
        }
    }

    #[test]
    #[serial]
    fn test_load_with_toml_file() {
        let (_dir, path) = write_config(
            r#"
environment = "test"

[retry]
max_retries = 2
jitter = false

[circuit_breaker]
failure_threshold = 3

[circuit_breakers.stockx]
failure_threshold = 10
success_threshold = 4
timeout_ms = 60000

[metrics]
slow_query_threshold_ms = 250.0
"#,
        );

        let config = ConfigLoader::new().with_file(&path).load().expect("Failed to load config");

        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.retry.max_retries, 2);
        assert!(!config.retry.jitter);
        assert_eq!(config.retry.max_delay_ms, 5_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.breaker_for("stockx").failure_threshold, 10);
        assert_eq!(config.breaker_for("goat").failure_threshold, 3);
        assert_eq!(config.metrics.slow_query_threshold_ms, 250.0);
    }

    #[test]
    #[serial]
    fn test_env_wins_over_file() {
        let (_dir, path) = write_config(
            r#"
[retry]
max_retries = 2
initial_delay_ms = 50
"#,
        );

        unsafe {
            env::set_var("SOLEBOX_RETRY__MAX_RETRIES", "7");
        }

        let config = ConfigLoader::new().with_file(&path).load().expect("Failed to load config");
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.initial_delay_ms, 50);

        unsafe {
            env::remove_var("SOLEBOX_RETRY__MAX_RETRIES");
        }
    }

    #[test]
    fn test_missing_file_error() {
        let result = ConfigLoader::new().with_file("/nonexistent/solebox.toml").load();
        assert!(matches!(result.unwrap_err(), ConfigError::FileNotFound(_)));
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        let (_dir, path) = write_config(
            r#"
[retry]
backoff_multiplier = 0.5

[circuit_breaker]
success_threshold = 0
"#,
        );

        let err = ConfigLoader::new().with_file(&path).load().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let msg = err.to_string();
        assert!(msg.contains("backoff_multiplier"), "got: {msg}");
        assert!(msg.contains("success_threshold"), "got: {msg}");
    }
}
