//! Unified Image Generation Gateway
//!
//! A Rust gateway exposing a single OpenAI-compatible image-generation API
//! while routing each request to heterogeneous upstream providers, with
//! credential-format routing, pooled credential health tracking, async
//! task polling, and size-budgeted image normalization.

pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod img;
pub mod orchestrator;
pub mod pool;
pub mod provider;

pub use error::{AppError, Result};

use std::sync::Arc;
use std::time::Duration;

use img::{ImageFetcher, ImageNormalizer};
use orchestrator::Orchestrator;
use pool::CredentialPool;
use provider::registry::ProviderRegistry;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: config::Settings,
    pub registry: Arc<ProviderRegistry>,
    pub pool: Arc<CredentialPool>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Construct the full application state from validated settings.
    /// Registries and pools are built once here and passed by reference;
    /// nothing is global.
    pub fn from_settings(settings: config::Settings) -> Result<Arc<Self>> {
        let registry = Arc::new(ProviderRegistry::from_settings(&settings)?);

        let pool = Arc::new(CredentialPool::new(settings.pool.clone()));
        for provider in &settings.providers {
            if !provider.credentials.is_empty() {
                pool.add_credentials(&provider.name, provider.credentials.iter().cloned());
            }
        }

        let fetcher = ImageFetcher::new(Duration::from_millis(settings.server.upstream_timeout_ms))?;
        let normalizer = ImageNormalizer::new(fetcher.clone(), &settings.image);

        let orchestrator = Orchestrator::new(
            registry.clone(),
            pool.clone(),
            normalizer,
            fetcher,
            settings.pool.max_attempts,
        );

        Ok(Arc::new(Self {
            settings,
            registry,
            pool,
            orchestrator,
        }))
    }
}
