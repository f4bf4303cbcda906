//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered in order:
//!
//! 1. Built-in defaults
//! 2. `veracity.toml` in the configuration directory
//! 3. `veracity.{environment}.toml`
//! 4. `VERACITY__SECTION__FIELD` environment variables

use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;

const BASE_FILE_STEM: &str = "veracity";
const ENV_PREFIX: &str = "VERACITY";

/// Loaded configuration plus the context it was loaded from
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that must not touch process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        if !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading orchestrator configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            max_concurrent_stages = config.coordinator.max_concurrent_stages,
            probe_interval_ms = config.health.probe_interval_ms,
            breakers_enabled = config.circuit_breakers.enabled,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an in-memory configuration, validating it first
    pub fn from_config(config: OrchestratorConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("VERACITY_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("VERACITY_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn build(directory: &Path, environment: &str) -> ConfigResult<OrchestratorConfig> {
        let base = directory.join(format!("{BASE_FILE_STEM}.toml"));
        let overlay = directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let load_error = |error: config::ConfigError| ConfigurationError::LoadError {
            environment: environment.to_string(),
            error: error.to_string(),
        };

        Config::builder()
            .add_source(File::from(base).format(FileFormat::Toml).required(false))
            .add_source(File::from(overlay).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(load_error)?
            .try_deserialize::<OrchestratorConfig>()
            .map_err(load_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().coordinator.max_concurrent_stages, 64);
        assert_eq!(manager.config().health.probe_interval_ms, 30_000);
    }

    #[test]
    fn test_environment_overlay_overrides_base() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("veracity.toml"),
            "[coordinator]\nwave_concurrency = 3\n\n[monitor]\nrolling_window = 20\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("veracity.staging.toml"),
            "[monitor]\nrolling_window = 7\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "staging")
                .unwrap();

        assert_eq!(manager.config().coordinator.wave_concurrency, 3);
        assert_eq!(manager.config().monitor.rolling_window, 7);
        // Untouched fields inside an overridden section keep their defaults
        assert_eq!(manager.config().monitor.max_escalation_level, 3);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("veracity.toml"),
            "[health]\nprobe_timeout_ms = 0\n",
        )
        .unwrap();

        let err =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_missing_directory_is_reported() {
        let err = ConfigManager::load_from_directory_with_env(
            Some(PathBuf::from("/definitely/not/a/config/dir")),
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DirectoryNotFound { .. }));
    }
}
