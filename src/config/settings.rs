//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub image: ImageBudgetConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Global upstream call budget in milliseconds
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_upstream_timeout() -> u64 {
    120_000
}

/// Gateway-level authentication configuration
///
/// `access_tokens` authenticate callers in backend mode; a bearer key that
/// instead matches a provider's credential pattern is relayed directly.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub access_tokens: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Credential pool behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_rate_limit_cooldown")]
    pub rate_limit_cooldown_secs: u64,
    #[serde(default = "default_auth_cooldown")]
    pub auth_cooldown_secs: u64,
    #[serde(default = "default_exhausted_cooldown")]
    pub exhausted_cooldown_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_rate_limit_cooldown() -> u64 {
    60
}

fn default_auth_cooldown() -> u64 {
    1800
}

fn default_exhausted_cooldown() -> u64 {
    600
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

impl PoolConfig {
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn auth_cooldown(&self) -> Duration {
        Duration::from_secs(self.auth_cooldown_secs)
    }

    pub fn exhausted_cooldown(&self) -> Duration {
        Duration::from_secs(self.exhausted_cooldown_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            rate_limit_cooldown_secs: default_rate_limit_cooldown(),
            auth_cooldown_secs: default_auth_cooldown(),
            exhausted_cooldown_secs: default_exhausted_cooldown(),
            failure_threshold: default_failure_threshold(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Byte budgets for input image normalization
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageBudgetConfig {
    /// Payloads at or under this size pass through untouched
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// The compression loop aims for this size
    #[serde(default = "default_target_bytes")]
    pub target_bytes: usize,
}

fn default_max_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_target_bytes() -> usize {
    3 * 1024 * 1024
}

impl Default for ImageBudgetConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            target_bytes: default_target_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// How a provider recognizes its own credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CredentialPattern {
    /// Fixed prefix token, e.g. `sk-`
    Prefix { value: String },
    /// UUID shape (8-4-4-4-12 hex)
    Uuid,
    /// Alphanumeric within a length range
    Alphanumeric { min_len: usize, max_len: usize },
}

/// Per-provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    /// "sync" for single request/response, "async" for submit+poll
    #[serde(default = "default_execution")]
    pub execution: String,
    pub endpoint: String,
    pub credential_pattern: CredentialPattern,
    /// Server-held credentials for backend mode
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default = "default_true")]
    pub text_to_image: bool,
    #[serde(default)]
    pub image_to_image: bool,
    #[serde(default)]
    pub multi_image: bool,
    #[serde(default = "default_max_input_images")]
    pub max_input_images: usize,
    pub default_model: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_size")]
    pub default_size: String,
    #[serde(default)]
    pub sizes: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Async providers only: poll interval and bounds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_execution() -> String {
    "sync".to_string()
}

fn default_max_input_images() -> usize {
    1
}

fn default_size() -> String {
    "1024x1024".to_string()
}

fn default_timeout() -> u64 {
    120_000
}

fn default_poll_interval() -> u64 {
    3000
}

fn default_poll_max_attempts() -> u32 {
    60
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("auth.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with IMG_GATEWAY__)
            .add_source(
                Environment::with_prefix("IMG_GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "Server port cannot be 0".to_string(),
            )));
        }

        if self.image.target_bytes > self.image.max_bytes {
            return Err(AppError::Config(config::ConfigError::Message(
                "image.target_bytes cannot exceed image.max_bytes".to_string(),
            )));
        }

        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(AppError::Config(config::ConfigError::Message(
                    "Provider name cannot be empty".to_string(),
                )));
            }
            if provider.endpoint.is_empty() {
                return Err(AppError::Config(config::ConfigError::Message(
                    format!("Provider '{}' must have an endpoint", provider.name),
                )));
            }
            if !["sync", "async"].contains(&provider.execution.as_str()) {
                return Err(AppError::Config(config::ConfigError::Message(
                    format!(
                        "Provider '{}' has invalid execution '{}'. Must be 'sync' or 'async'",
                        provider.name, provider.execution
                    ),
                )));
            }
            if provider.max_input_images == 0 && provider.image_to_image {
                return Err(AppError::Config(config::ConfigError::Message(
                    format!(
                        "Provider '{}' supports image input but allows 0 input images",
                        provider.name
                    ),
                )));
            }
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                upstream_timeout_ms: default_upstream_timeout(),
            },
            auth: AuthConfig {
                enabled: true,
                access_tokens: vec![],
            },
            pool: PoolConfig::default(),
            image: ImageBudgetConfig::default(),
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
            providers: vec![],
        }
    }
}
