use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Default cache budget: 500 MB.
pub const DEFAULT_CACHE_BUDGET_BYTES: u64 = 500 * 1024 * 1024;

/// Configuration for model storage locations
#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    /// Directory where model artifacts and the registry file live
    pub directory: PathBuf,
}

/// Configuration for the model cache
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Total resident byte budget across all loaded models
    pub budget_bytes: u64,
}

/// Configuration for the download coordinator
#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    /// Maximum number of concurrent downloads in a batch
    pub max_parallel: usize,
}

/// Configuration for inference and postprocessing
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Maximum number of concurrent inference workers in a batch
    pub workers: usize,
    /// Predictions below this confidence are dropped (0.0-1.0)
    pub confidence_threshold: f32,
    /// IoU threshold for non-max suppression (0.0-1.0)
    pub iou_threshold: f32,
    /// Optional cap on the number of predictions returned per call
    pub top_k: Option<usize>,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Optional log directory for rolling file output
    pub file: Option<PathBuf>,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub models: ModelsConfig,
    pub cache: CacheConfig,
    pub download: DownloadConfig,
    pub inference: InferenceConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Creates a new Settings instance by loading config from multiple
    /// sources in the following order of precedence (highest to lowest):
    /// 1. Environment variables prefixed with MODELDOCK_
    /// 2. Local config file (local.toml) if present
    /// 3. Default config file (default.toml)
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(format!("Failed to get current directory: {}", e)))?
            .join("config");

        if !config_dir.exists() {
            return Err(ConfigError::Message(format!(
                "Config directory not found at: {}",
                config_dir.display()
            )));
        }

        let default_config = config_dir.join("default.toml");
        if !default_config.exists() {
            return Err(ConfigError::Message(format!(
                "Default configuration file not found at: {}",
                default_config.display()
            )));
        }

        let local_config = config_dir.join("local.toml");

        let default_config_path = default_config.to_string_lossy();
        let local_config_path = local_config.to_string_lossy();

        let settings = Config::builder()
            .add_source(File::with_name(&default_config_path))
            .add_source(File::with_name(&local_config_path).required(false))
            .add_source(Environment::with_prefix("MODELDOCK").separator("_"))
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Settings with stock defaults rooted at the given models directory.
    ///
    /// Useful for embedders and tests that wire the pipeline without a
    /// config directory on disk.
    pub fn with_models_dir(directory: PathBuf) -> Self {
        Settings {
            models: ModelsConfig { directory },
            cache: CacheConfig {
                budget_bytes: DEFAULT_CACHE_BUDGET_BYTES,
            },
            download: DownloadConfig { max_parallel: 3 },
            inference: InferenceConfig {
                workers: 4,
                confidence_threshold: 0.25,
                iou_threshold: 0.45,
                top_k: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
            },
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Create models directory if it doesn't exist
        if !self.models.directory.exists() {
            std::fs::create_dir_all(&self.models.directory).map_err(|e| {
                ConfigError::Message(format!(
                    "Failed to create models directory at {}: {}",
                    self.models.directory.display(),
                    e
                ))
            })?;
        }

        if self.cache.budget_bytes == 0 {
            return Err(ConfigError::Message(
                "cache.budget_bytes must be greater than 0".to_string(),
            ));
        }

        if self.download.max_parallel == 0 {
            return Err(ConfigError::Message(
                "download.max_parallel must be greater than 0".to_string(),
            ));
        }

        if self.inference.workers == 0 {
            return Err(ConfigError::Message(
                "inference.workers must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.inference.confidence_threshold) {
            return Err(ConfigError::Message(format!(
                "confidence_threshold must be between 0.0 and 1.0, got: {}",
                self.inference.confidence_threshold
            )));
        }

        if !(0.0..=1.0).contains(&self.inference.iou_threshold) {
            return Err(ConfigError::Message(format!(
                "iou_threshold must be between 0.0 and 1.0, got: {}",
                self.inference.iou_threshold
            )));
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(format!(
                "Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                self.logging.level
            ))),
        }?;

        // Create log file directory if configured and doesn't exist
        if let Some(log_dir) = &self.logging.file {
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir).map_err(|e| {
                    ConfigError::Message(format!(
                        "Failed to create log directory at {}: {}",
                        log_dir.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let dir = std::env::temp_dir().join(format!("modeldock-cfg-{}", std::process::id()));
        let settings = Settings::with_models_dir(dir.clone());
        settings.validate().unwrap();
        assert_eq!(settings.cache.budget_bytes, DEFAULT_CACHE_BUDGET_BYTES);
        assert_eq!(settings.download.max_parallel, 3);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn zero_budget_rejected() {
        let dir = std::env::temp_dir().join(format!("modeldock-cfg0-{}", std::process::id()));
        let mut settings = Settings::with_models_dir(dir.clone());
        settings.cache.budget_bytes = 0;
        assert!(settings.validate().is_err());
        std::fs::remove_dir_all(dir).ok();
    }
}
