//! Provider registry and credential-format routing

use std::sync::Arc;
use tracing::debug;

use crate::config::{CredentialPattern, Settings};
use crate::error::Result;
use crate::provider::async_http::AsyncHttpProvider;
use crate::provider::sync_http::SyncHttpProvider;
use crate::provider::traits::ProviderAdapter;

/// Registry of provider adapters, evaluated in registration order.
/// Constructed once at startup and passed explicitly to the orchestrator.
pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Build adapters for every enabled provider in the settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut registry = Self::new();
        for config in settings.providers.iter().filter(|p| p.enabled) {
            let adapter: Arc<dyn ProviderAdapter> = if config.execution == "async" {
                Arc::new(AsyncHttpProvider::new(config)?)
            } else {
                Arc::new(SyncHttpProvider::new(config)?)
            };
            registry.register(adapter);
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.push(adapter);
    }

    /// Route a credential to the first provider whose predicate matches
    pub fn detect(&self, key: &str) -> Option<Arc<dyn ProviderAdapter>> {
        for adapter in &self.adapters {
            if adapter.detect_credential(key) {
                debug!(provider = %adapter.name(), "Routed credential by format");
                return Some(adapter.clone());
            }
        }
        None
    }

    /// Look up a provider by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .cloned()
    }

    /// Backend-mode selection: the first provider listing the requested
    /// model, or the first registered provider when no model is given.
    pub fn for_model(&self, model: Option<&str>) -> Option<Arc<dyn ProviderAdapter>> {
        match model {
            Some(model) => {
                let found = self.adapters.iter().find(|a| {
                    crate::provider::descriptor::supports_model(a.descriptor(), model)
                });
                if let Some(adapter) = found {
                    debug!(provider = %adapter.name(), model = %model, "Routed by model");
                }
                found.cloned()
            }
            None => self.adapters.first().cloned(),
        }
    }

    pub fn all(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.adapters
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a configured credential pattern against a key
pub fn credential_matches(pattern: &CredentialPattern, key: &str) -> bool {
    match pattern {
        CredentialPattern::Prefix { value } => key.starts_with(value.as_str()),
        CredentialPattern::Uuid => is_uuid_shaped(key),
        CredentialPattern::Alphanumeric { min_len, max_len } => {
            key.len() >= *min_len
                && key.len() <= *max_len
                && key.chars().all(|c| c.is_ascii_alphanumeric())
        }
    }
}

/// 8-4-4-4-12 hex groups separated by hyphens
fn is_uuid_shaped(key: &str) -> bool {
    let bytes = key.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}
