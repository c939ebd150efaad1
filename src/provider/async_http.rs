//! Asynchronous (submit + poll) HTTP provider adapter
//!
//! Covers upstreams where generation is a long-running job: submission
//! returns a task id and the result must be polled from a status endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::classify::{friendly_error, ErrorKind};
use crate::config::{CredentialPattern, ProviderConfig};
use crate::error::{AppError, Result};
use crate::provider::descriptor::ProviderDescriptor;
use crate::provider::poll::{PollOutcome, PollerConfig, TaskPoller};
use crate::provider::registry::credential_matches;
use crate::provider::traits::ProviderAdapter;
use crate::provider::types::{CallOptions, ProviderRequest, ProviderResponse};

/// Submit+poll image generation backend
pub struct AsyncHttpProvider {
    descriptor: ProviderDescriptor,
    pattern: CredentialPattern,
    client: Client,
    endpoint: String,
    request_timeout: Duration,
    poller_config: PollerConfig,
}

impl AsyncHttpProvider {
    /// Create a new asynchronous provider from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let request_timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            descriptor: ProviderDescriptor::from_config(config),
            pattern: config.credential_pattern.clone(),
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            request_timeout,
            poller_config: PollerConfig {
                interval: Duration::from_millis(config.poll_interval_ms),
                max_attempts: config.poll_max_attempts,
                ..PollerConfig::default()
            },
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

    /// Submit the generation job, returning the provider-assigned task id
    async fn submit(
        &self,
        credential: &str,
        request: &ProviderRequest,
        opts: &CallOptions,
    ) -> Result<String> {
        let url = format!("{}/v1/images/tasks", self.endpoint);

        let body = serde_json::json!({
            "prompt": request.prompt,
            "model": request.model,
            "size": request.size,
            "n": request.n,
            "image": request.images.iter().map(|i| i.to_uri()).collect::<Vec<_>>(),
            "response_format": if opts.want_inline_base64 { "b64_json" } else { "url" },
        });

        debug!(
            provider = %self.name(),
            request_id = %opts.request_id,
            model = %request.model,
            "Submitting generation task"
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
                    AppError::Timeout(format!("{} did not accept the task in time", self.name()))
                } else {
                    self.upstream_error(&e.to_string(), None)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(self.upstream_error(&raw, Some(status.as_u16())));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| self.upstream_error(&format!("unparseable response: {}", e), None))?;

        extract_task_id(&value).ok_or_else(|| {
            self.upstream_error("submission response carried no task id", None)
        })
    }
}

/// Task ids show up under several keys depending on the upstream
fn extract_task_id(value: &Value) -> Option<String> {
    let direct = ["task_id", "id", "request_id"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()));
    if let Some(id) = direct {
        return Some(id.to_string());
    }
    let data = value.get("data")?;
    ["task_id", "id"]
        .iter()
        .find_map(|key| data.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

#[async_trait]
impl ProviderAdapter for AsyncHttpProvider {
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
        // Submission plus the full poll cycle, each poll bounded by the
        // request timeout
        self.request_timeout
            + (self.poller_config.interval + self.request_timeout)
                * self.poller_config.max_attempts
    }

    async fn generate(
        &self,
        credential: &str,
        request: &ProviderRequest,
        opts: &CallOptions,
    ) -> Result<ProviderResponse> {
        let task_id = self.submit(credential, request, opts).await?;

        debug!(
            provider = %self.name(),
            request_id = %opts.request_id,
            task_id = %task_id,
            "Task submitted, polling"
        );

        let status_url = format!("{}/v1/images/tasks/{}", self.endpoint, task_id);
        let client = self.client.clone();
        let credential = credential.to_string();

        let poller = TaskPoller::new(self.poller_config.clone());
        let outcome = poller
            .run(&task_id, || {
                let client = client.clone();
                let url = status_url.clone();
                let credential = credential.clone();
                async move {
                    let response = client.get(&url).bearer_auth(&credential).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        let raw = response.text().await.unwrap_or_default();
                        return Err(AppError::Internal(format!(
                            "status endpoint returned {}: {}",
                            status, raw
                        )));
                    }
                    Ok(response.json::<Value>().await?)
                }
            })
            .await;

        match outcome {
            PollOutcome::Success(images) => Ok(ProviderResponse {
                images,
                model: Some(request.model.clone()),
            }),
            PollOutcome::Failure(reason) => Err(self.upstream_error(&reason, None)),
            PollOutcome::Cancelled => Err(AppError::Upstream {
                kind: ErrorKind::Unknown,
                provider: Some(self.name().to_string()),
                message: format!("{}: the generation task was cancelled", self.name()),
                status: None,
            }),
            PollOutcome::Timeout => Err(AppError::Timeout(format!(
                "{} task {} did not finish within the poll budget",
                self.name(),
                task_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_task_id_shapes() {
        assert_eq!(
            extract_task_id(&json!({"task_id": "t-1"})),
            Some("t-1".to_string())
        );
        assert_eq!(
            extract_task_id(&json!({"id": "t-2"})),
            Some("t-2".to_string())
        );
        assert_eq!(
            extract_task_id(&json!({"data": {"task_id": "t-3"}})),
            Some("t-3".to_string())
        );
        assert_eq!(extract_task_id(&json!({"ok": true})), None);
    }
}
