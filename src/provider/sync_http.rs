//! Synchronous HTTP provider adapter
//!
//! Covers upstreams that answer a generation request in a single
//! request/response round trip.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::classify::friendly_error;
use crate::config::{CredentialPattern, ProviderConfig};
use crate::error::{AppError, Result};
use crate::provider::descriptor::ProviderDescriptor;
use crate::provider::registry::credential_matches;
use crate::provider::traits::ProviderAdapter;
use crate::provider::types::{CallOptions, ImageRef, ProviderRequest, ProviderResponse};

/// Single round-trip image generation backend
pub struct SyncHttpProvider {
    descriptor: ProviderDescriptor,
    pattern: CredentialPattern,
    client: Client,
    endpoint: String,
    timeout: Duration,
}

/// Generic generation request body for JSON upstreams
#[derive(Debug, Serialize)]
struct ApiGenerateRequest {
    prompt: String,
    model: String,
    size: String,
    n: u32,
    response_format: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image: Vec<String>,
}

/// Generic generation response; upstreams disagree on the envelope field
#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    images: Vec<ApiImageData>,
    #[serde(default)]
    data: Vec<ApiImageData>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    base64: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl SyncHttpProvider {
    /// Create a new synchronous provider from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            descriptor: ProviderDescriptor::from_config(config),
            pattern: config.credential_pattern.clone(),
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn upstream_error(&self, raw: &str, status: Option<u16>) -> AppError {
        let (kind, message) = friendly_error(Some(self.name()), raw, status);
        AppError::Upstream {
            kind,
            provider: Some(self.name().to_string()),
            message,
            status,
        }
    }
}

#[async_trait]
impl ProviderAdapter for SyncHttpProvider {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn detect_credential(&self, key: &str) -> bool {
        credential_matches(&self.pattern, key)
    }

    fn call_budget(&self) -> Duration {
        self.timeout
    }

    async fn generate(
        &self,
        credential: &str,
        request: &ProviderRequest,
        opts: &CallOptions,
    ) -> Result<ProviderResponse> {
        let url = format!("{}/v1/images/generations", self.endpoint);

        let body = ApiGenerateRequest {
            prompt: request.prompt.clone(),
            model: request.model.clone(),
            size: request.size.clone(),
            n: request.n,
            response_format: if opts.want_inline_base64 {
                "b64_json".to_string()
            } else {
                "url".to_string()
            },
            image: request.images.iter().map(|i| i.to_uri()).collect(),
        };

        debug!(
            provider = %self.name(),
            request_id = %opts.request_id,
            model = %request.model,
            "Sending generate request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("{} did not answer in time", self.name()))
                } else {
                    self.upstream_error(&e.to_string(), None)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(self.upstream_error(&raw, Some(status.as_u16())));
        }

        let api_response: ApiGenerateResponse = response
            .json()
            .await
            .map_err(|e| self.upstream_error(&format!("unparseable response: {}", e), None))?;

        // Combine images from both possible envelope fields
        let mut all_images = api_response.images;
        all_images.extend(api_response.data);

        let images: Vec<ImageRef> = all_images
            .into_iter()
            .filter_map(|img| {
                img.url
                    .or(img.b64_json)
                    .or(img.base64)
                    .map(|s| ImageRef::parse(&s))
            })
            .collect();

        if images.is_empty() {
            return Err(self.upstream_error("response contained no images", None));
        }

        Ok(ProviderResponse {
            images,
            model: api_response.model,
        })
    }
}
