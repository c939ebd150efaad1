//! Per-request generation control loop
//!
//! The orchestrator owns the path from a validated inbound request to a
//! finished result: provider selection, credential acquisition, the
//! bounded retry loop with credential rotation in backend mode, and
//! conversion of the upstream's output into the representation the caller
//! asked for.

use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::ErrorKind;
use crate::error::{AppError, Result};
use crate::img::base64 as b64;
use crate::img::{ImageFetcher, ImageNormalizer};
use crate::pool::{CredentialPool, FailureKind};
use crate::provider::descriptor::{resolve_model, resolve_size, validate_request};
use crate::provider::registry::ProviderRegistry;
use crate::provider::traits::ProviderAdapter;
use crate::provider::types::{
    CallOptions, GenerationOutput, GenerationRequest, ImageRef, OutputFormat, ProviderRequest,
};

/// Ceiling on downloads performed to inline URL outputs as base64
const OUTPUT_DOWNLOAD_LIMIT: usize = 32 * 1024 * 1024;

/// How a request is authenticated and routed
#[derive(Debug, Clone)]
pub enum Mode {
    /// Caller supplied an upstream-native credential; provider selection is
    /// by credential format, no pooling, no retry
    Relay { credential: String },
    /// Caller authenticated to the gateway; provider is selected from the
    /// model field and credentials come from the pool
    Backend,
}

/// Drives a single generation request end to end
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    pool: Arc<CredentialPool>,
    normalizer: ImageNormalizer,
    fetcher: ImageFetcher,
    max_attempts: u32,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        pool: Arc<CredentialPool>,
        normalizer: ImageNormalizer,
        fetcher: ImageFetcher,
        max_attempts: u32,
    ) -> Self {
        Self {
            registry,
            pool,
            normalizer,
            fetcher,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
        mode: Mode,
    ) -> Result<GenerationOutput> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let adapter = self.select_provider(&request, &mode)?;
        let descriptor = adapter.descriptor();

        // Validation failures are terminal and never retried
        validate_request(descriptor, &request)?;

        let images = self.normalizer.normalize(request.images.clone()).await;

        let provider_request = ProviderRequest {
            prompt: request.prompt.clone(),
            images,
            model: resolve_model(descriptor, request.model.as_deref()),
            size: resolve_size(descriptor, request.size.as_deref()),
            n: request.n.unwrap_or(1).max(1),
        };

        let opts = CallOptions {
            request_id: request_id.clone(),
            timeout: adapter.call_budget(),
            // Only ask for inline output where the upstream can emit it
            want_inline_base64: request.output_format == OutputFormat::B64Json
                && descriptor.output_formats.contains(&OutputFormat::B64Json),
        };

        let max_attempts = match mode {
            Mode::Relay { .. } => 1,
            Mode::Backend => self.max_attempts,
        };

        let mut last_error: Option<AppError> = None;

        for attempt in 1..=max_attempts {
            let credential = match &mode {
                Mode::Relay { credential } => credential.clone(),
                Mode::Backend => match self.pool.next_available(adapter.name()) {
                    Some(credential) => credential.secret,
                    None if attempt == 1 => {
                        // Nothing eligible before any network call was made
                        return Err(AppError::NoAvailableCredential(adapter.name().to_string()));
                    }
                    None => break,
                },
            };

            debug!(
                request_id = %request_id,
                provider = %adapter.name(),
                attempt,
                "Invoking provider"
            );

            let call = adapter.generate(&credential, &provider_request, &opts);
            let result = match tokio::time::timeout(opts.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(format!(
                    "call to {} exceeded its {}s budget",
                    adapter.name(),
                    opts.timeout.as_secs()
                ))),
            };

            match result {
                Ok(response) => {
                    if matches!(mode, Mode::Backend) {
                        self.pool.report_success(adapter.name(), &credential);
                    }

                    let outputs = self
                        .convert_outputs(response.images, request.output_format)
                        .await;

                    let elapsed = started.elapsed();
                    info!(
                        request_id = %request_id,
                        provider = %adapter.name(),
                        images = outputs.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Generation complete"
                    );

                    return Ok(GenerationOutput {
                        images: outputs,
                        model: response.model.unwrap_or(provider_request.model),
                        elapsed,
                    });
                }
                Err(error) => {
                    let kind = error.kind();
                    warn!(
                        request_id = %request_id,
                        provider = %adapter.name(),
                        attempt,
                        kind = ?kind,
                        "Provider call failed"
                    );

                    if let Mode::Backend = mode {
                        self.pool
                            .report_failure(adapter.name(), &credential, failure_kind(&error));

                        if !kind.is_retryable() {
                            return Err(error);
                        }
                        last_error = Some(error);

                        if attempt < max_attempts {
                            // Small jittered pause before rotating credentials
                            let jitter = rand::thread_rng().gen_range(50..250);
                            tokio::time::sleep(Duration::from_millis(jitter)).await;
                        }
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AppError::Internal("generation attempts exhausted".to_string())))
    }

    fn select_provider(
        &self,
        request: &GenerationRequest,
        mode: &Mode,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        match mode {
            Mode::Relay { credential } => self.registry.detect(credential).ok_or_else(|| {
                AppError::AuthenticationFailed(
                    "credential does not match any provider".to_string(),
                )
            }),
            Mode::Backend => self
                .registry
                .for_model(request.model.as_deref())
                .ok_or_else(|| {
                    AppError::ProviderNotFound(
                        request
                            .model
                            .clone()
                            .unwrap_or_else(|| "(no model)".to_string()),
                    )
                }),
        }
    }

    /// Convert upstream outputs to the caller's requested representation.
    /// Best-effort per image: a failed download leaves the URL as-is.
    async fn convert_outputs(
        &self,
        images: Vec<ImageRef>,
        format: OutputFormat,
    ) -> Vec<ImageRef> {
        match format {
            // Base64 outputs render as data URIs at the API layer, so
            // nothing to do for URL-requested output
            OutputFormat::Url => images,
            OutputFormat::B64Json => {
                let mut out = Vec::with_capacity(images.len());
                for image in images {
                    out.push(self.inline_as_base64(image).await);
                }
                out
            }
        }
    }

    async fn inline_as_base64(&self, image: ImageRef) -> ImageRef {
        match image {
            ImageRef::Base64 { .. } => image,
            ImageRef::Url(ref url) => {
                match self.fetcher.download(url, OUTPUT_DOWNLOAD_LIMIT).await {
                    Ok(bytes) => {
                        let media_type = b64::detect_media_type(&bytes).map(|m| m.to_string());
                        ImageRef::Base64 {
                            media_type,
                            data: b64::encode(&bytes),
                        }
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "Could not inline output image, keeping URL");
                        image
                    }
                }
            }
        }
    }
}

/// Map a classified failure onto the pool's failure vocabulary
fn failure_kind(error: &AppError) -> FailureKind {
    match error {
        AppError::Upstream {
            status: Some(401), ..
        }
        | AppError::Upstream {
            status: Some(403), ..
        } => FailureKind::AuthError,
        _ => match error.kind() {
            ErrorKind::RateLimit => FailureKind::RateLimit,
            _ => FailureKind::Other,
        },
    }
}
