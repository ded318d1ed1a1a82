//! Configuration for the mlsharp server.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root for uploaded images and generated artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// SQLite database. Accepts a `sqlite:` prefix and `:memory:`.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Largest accepted upload, in megabytes.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

impl StorageConfig {
    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize).saturating_mul(1024 * 1024)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_url: default_database_url(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Worker threads executing jobs.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Render jobs allowed on the GPU at once.
    #[serde(default = "default_max_gpu_tasks")]
    pub max_gpu_tasks: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_gpu_tasks: default_max_gpu_tasks(),
        }
    }
}

/// External predictor command.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictorConfig {
    #[serde(default = "default_predictor_program")]
    pub program: String,
    /// Arguments inserted before the job flags, e.g. a subcommand.
    #[serde(default = "default_predictor_args")]
    pub args: Vec<String>,
    /// Model checkpoint passed as `--checkpoint` when set.
    #[serde(default)]
    pub model_path: Option<String>,
    /// One of auto, cpu, cuda, mps.
    #[serde(default = "default_device")]
    pub device_default: String,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            program: default_predictor_program(),
            args: default_predictor_args(),
            model_path: None,
            device_default: default_device(),
        }
    }
}

/// External renderer command.
#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    #[serde(default = "default_predictor_program")]
    pub program: String,
    #[serde(default = "default_renderer_args")]
    pub args: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: default_predictor_program(),
            args: default_renderer_args(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    11011
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_database_url() -> String {
    "sqlite:./data/mlsharp.db".to_string()
}
fn default_max_upload_mb() -> u64 {
    10
}
fn default_max_workers() -> usize {
    4
}
fn default_max_gpu_tasks() -> usize {
    1
}
fn default_predictor_program() -> String {
    "sharp".to_string()
}
fn default_predictor_args() -> Vec<String> {
    vec!["predict".to_string()]
}
fn default_renderer_args() -> Vec<String> {
    vec!["render".to_string()]
}
fn default_device() -> String {
    "auto".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (MLSHARP__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("api.host", default_host())?
            .set_default("api.port", default_port() as i64)?
            .set_default("runner.max_workers", default_max_workers() as i64)?
            .set_default("runner.max_gpu_tasks", default_max_gpu_tasks() as i64)?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("MLSHARP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("predictor.args")
                    .with_list_parse_key("renderer.args"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.max_workers == 0 {
            return Err(ConfigError::Message(
                "runner.max_workers must be at least 1".to_string(),
            ));
        }
        if self.runner.max_gpu_tasks == 0 {
            return Err(ConfigError::Message(
                "runner.max_gpu_tasks must be at least 1".to_string(),
            ));
        }
        if self.storage.max_upload_mb == 0 {
            return Err(ConfigError::Message(
                "storage.max_upload_mb must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Defaults with everything under `data_dir` and an in-memory database.
    pub fn for_data_dir(data_dir: impl Into<String>) -> Self {
        Self {
            api: ApiConfig::default(),
            storage: StorageConfig {
                data_dir: data_dir.into(),
                database_url: ":memory:".to_string(),
                max_upload_mb: default_max_upload_mb(),
            },
            runner: RunnerConfig::default(),
            predictor: PredictorConfig::default(),
            renderer: RendererConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::for_data_dir("./data");
        assert_eq!(config.api.port, 11011);
        assert_eq!(config.runner.max_workers, 4);
        assert_eq!(config.runner.max_gpu_tasks, 1);
        assert_eq!(config.predictor.device_default, "auto");
        assert_eq!(config.storage.max_upload_bytes(), 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_gpu_tasks_rejected() {
        let mut config = Config::for_data_dir("./data");
        config.runner.max_gpu_tasks = 0;
        assert!(config.validate().is_err());

        let mut config = Config::for_data_dir("./data");
        config.runner.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sections_deserialize_from_toml() {
        let config: Config = ConfigLoader::builder()
            .add_source(config::File::from_str(
                r#"
                [runner]
                max_gpu_tasks = 2

                [predictor]
                program = "/opt/sharp/bin/sharp"
                model_path = "/models/sharp.pt"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.runner.max_gpu_tasks, 2);
        assert_eq!(config.runner.max_workers, 4);
        assert_eq!(config.predictor.model_path.as_deref(), Some("/models/sharp.pt"));
        assert_eq!(config.predictor.args, vec!["predict"]);
        assert_eq!(config.storage.database_url, "sqlite:./data/mlsharp.db");
    }
}
