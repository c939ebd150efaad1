//! Configuration module

pub mod settings;

pub use settings::{
    AuthConfig, CredentialPattern, ImageBudgetConfig, LoggingConfig, PoolConfig, ProviderConfig,
    ServerConfig, Settings,
};
