//! Configuration loader with layered sources.

use crate::AppConfig;
use config::{Config, ConfigError, Environment, File};
use lexflow_core::LexError;
use lexflow_jobs::StoreBackend;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration loader with runtime refresh support.
#[derive(Clone, Debug)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides (not committed)
    /// 4. Environment variables with `LEXFLOW_` prefix
    pub fn new(config_dir: impl Into<String>) -> Result<Self, LexError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, LexError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), LexError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &str) -> Result<AppConfig, LexError> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("LEXFLOW_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        // 1. Load default configuration
        let default_path = format!("{}/default.toml", config_dir);
        if Path::new(&default_path).exists() {
            debug!("Loading default config from: {}", default_path);
            builder = builder.add_source(File::with_name(&default_path).required(false));
        }

        // 2. Load environment-specific configuration
        let env_path = format!("{}/{}.toml", config_dir, environment);
        if Path::new(&env_path).exists() {
            debug!("Loading environment config from: {}", env_path);
            builder = builder.add_source(File::with_name(&env_path).required(false));
        }

        // 3. Load local overrides (not committed to version control)
        let local_path = format!("{}/local.toml", config_dir);
        if Path::new(&local_path).exists() {
            debug!("Loading local config from: {}", local_path);
            builder = builder.add_source(File::with_name(&local_path).required(false));
        }

        // 4. Override with environment variables (LEXFLOW_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("LEXFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_lex_error)?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_lex_error)?;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    /// Validates the configuration.
    fn validate_config(config: &AppConfig) -> Result<(), LexError> {
        if config.server.port == 0 {
            return Err(LexError::Configuration(
                "Server port must be non-zero".to_string(),
            ));
        }

        if config.jobs.backend == StoreBackend::Redis && config.jobs.redis.url.is_empty() {
            return Err(LexError::Configuration(
                "Redis URL is required for the redis store backend".to_string(),
            ));
        }

        if config.jobs.retry.base_delay_ms > config.jobs.retry.max_delay_ms {
            return Err(LexError::Configuration(
                "Retry base delay must not exceed the max delay".to_string(),
            ));
        }

        if config.jobs.lease.duration_secs == 0 {
            return Err(LexError::Configuration(
                "Lease duration must be non-zero".to_string(),
            ));
        }

        let threshold = config.jobs.health.failed_ratio_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(LexError::Configuration(format!(
                "Failed ratio threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        // Warn about wildcard CORS in production
        if config.app.environment == "production"
            && config.server.cors_origins.iter().any(|o| o == "*")
        {
            warn!("CORS allows all origins in production");
        }

        Ok(())
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error_to_lex_error(err: ConfigError) -> LexError {
    LexError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_yields_defaults() {
        let loader = ConfigLoader::new("/nonexistent/config/dir").unwrap();
        let config = loader.get().await;
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.app.environment, "development");
    }

    #[tokio::test]
    async fn test_default_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "default.toml",
            r#"
[server]
port = 9000

[jobs.queues.document_processing]
concurrency = 4
"#,
        );

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.jobs.queues.document_processing.concurrency, 4);
        assert_eq!(config.jobs.queues.user_requests.concurrency, 2);
    }

    #[tokio::test]
    async fn test_local_toml_wins_over_default() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "default.toml", "[server]\nport = 9000\n");
        write_config(dir.path(), "local.toml", "[server]\nport = 9001\n");

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.server.port, 9001);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "default.toml",
            r#"
[jobs]
backend = "redis"

[jobs.redis]
url = ""
"#,
        );

        let err = ConfigLoader::new(dir.path().to_string_lossy()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_retry_delay_bounds_validated() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "default.toml",
            "[jobs.retry]\nbase_delay_ms = 120000\nmax_delay_ms = 60000\n",
        );

        let err = ConfigLoader::new(dir.path().to_string_lossy()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_get_value_by_path() {
        let loader = ConfigLoader::new("/nonexistent/config/dir").unwrap();

        let port: Option<u16> = loader.get_value("server.port").await;
        assert_eq!(port, Some(8080));

        let backend: Option<String> = loader.get_value("jobs.backend").await;
        assert_eq!(backend, Some("memory".to_string()));

        let missing: Option<String> = loader.get_value("server.nope").await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "default.toml", "[server]\nport = 9000\n");

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        assert_eq!(loader.get().await.server.port, 9000);

        write_config(dir.path(), "default.toml", "[server]\nport = 9100\n");
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.server.port, 9100);
    }
}
