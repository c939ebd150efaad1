//! Bounded polling loop for asynchronous generation tasks
//!
//! Async providers return a task id on submission; the task is then polled
//! at a fixed interval until it reaches a terminal state or the attempt
//! budget runs out. Status responses are not uniformly structured across
//! providers, so both the status field and the output payload are located
//! by trying a fixed list of accepted shapes in order.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::provider::types::ImageRef;

/// Poll loop tuning
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Consecutive unusable responses tolerated before giving up
    pub invalid_threshold: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 60,
            invalid_threshold: 6,
        }
    }
}

/// Terminal outcome of a polled task
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Success(Vec<ImageRef>),
    Failure(String),
    Cancelled,
    Timeout,
}

/// Status reported by one poll response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Pending,
    Success,
    Failure,
    Cancelled,
}

/// Drives a submitted task to completion
pub struct TaskPoller {
    config: PollerConfig,
}

impl TaskPoller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    /// Poll until terminal. `fetch` requests the task's current status and
    /// may fail transiently; a fetch error is inconclusive for the task but
    /// feeds the invalid-response streak so a misbehaving status endpoint
    /// cannot be polled forever.
    pub async fn run<F, Fut>(&self, task_id: &str, fetch: F) -> PollOutcome
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let mut invalid_streak: u32 = 0;

        for attempt in 1..=self.config.max_attempts {
            let response = match fetch().await {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(task_id = %task_id, attempt, error = %e, "Poll request failed");
                    None
                }
            };

            let status = response.as_ref().and_then(parse_status);

            match status {
                Some(TaskStatus::Pending) => {
                    invalid_streak = 0;
                    debug!(task_id = %task_id, attempt, "Task still pending");
                }
                Some(TaskStatus::Success) => {
                    return match response.as_ref().and_then(extract_output) {
                        Some(images) => PollOutcome::Success(images),
                        // A success status with no recognizable payload is a failure
                        None => PollOutcome::Failure(
                            "task reported success without a recognizable output".to_string(),
                        ),
                    };
                }
                Some(TaskStatus::Failure) => {
                    let reason = response
                        .as_ref()
                        .and_then(extract_failure_reason)
                        .unwrap_or_else(|| "task failed".to_string());
                    return PollOutcome::Failure(reason);
                }
                Some(TaskStatus::Cancelled) => return PollOutcome::Cancelled,
                None => {
                    invalid_streak += 1;
                    if invalid_streak > self.config.invalid_threshold {
                        return PollOutcome::Failure(format!(
                            "status endpoint returned {} consecutive unusable responses",
                            invalid_streak
                        ));
                    }
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.interval).await;
            }
        }

        PollOutcome::Timeout
    }
}

/// Locate and normalize the status field
fn parse_status(value: &Value) -> Option<TaskStatus> {
    let raw = ["status", "state", "task_status"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))?;

    match raw.to_lowercase().as_str() {
        "pending" | "queued" | "processing" | "running" | "in_progress" | "waiting"
        | "submitted" => Some(TaskStatus::Pending),
        "success" | "succeeded" | "completed" | "complete" | "done" | "finished" => {
            Some(TaskStatus::Success)
        }
        "failure" | "failed" | "error" => Some(TaskStatus::Failure),
        "cancelled" | "canceled" | "aborted" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

fn extract_failure_reason(value: &Value) -> Option<String> {
    ["reason", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

type Extractor = fn(&Value) -> Option<Vec<ImageRef>>;

/// Accepted output nesting conventions, tried in order
const EXTRACTORS: &[Extractor] = &[
    extract_data_url,
    extract_data_array,
    extract_output_field,
    extract_result_images,
    extract_top_level,
];

/// Pull the generated images out of a success response
pub fn extract_output(value: &Value) -> Option<Vec<ImageRef>> {
    EXTRACTORS.iter().find_map(|extract| extract(value))
}

/// `{"data": {"url": ...}}` or `{"data": {"image_url": ...}}`
fn extract_data_url(value: &Value) -> Option<Vec<ImageRef>> {
    let data = value.get("data")?;
    let url = data
        .get("url")
        .or_else(|| data.get("image_url"))?
        .as_str()?;
    Some(vec![ImageRef::parse(url)])
}

/// `{"data": [{"url": ...} | {"b64_json": ...} | "raw-ref", ...]}`
fn extract_data_array(value: &Value) -> Option<Vec<ImageRef>> {
    let items = value.get("data")?.as_array()?;
    collect_refs(items)
}

/// `{"output": "ref"}` or `{"output": {"url": ...}}` or `{"output": [...]}`
fn extract_output_field(value: &Value) -> Option<Vec<ImageRef>> {
    let output = value.get("output")?;
    if let Some(s) = output.as_str() {
        return Some(vec![ImageRef::parse(s)]);
    }
    if let Some(items) = output.as_array() {
        return collect_refs(items);
    }
    let url = output.get("url")?.as_str()?;
    Some(vec![ImageRef::parse(url)])
}

/// `{"result": {"images": [...]}}`
fn extract_result_images(value: &Value) -> Option<Vec<ImageRef>> {
    let items = value.get("result")?.get("images")?.as_array()?;
    collect_refs(items)
}

/// `{"url": ...}`, `{"urls": [...]}`, `{"images": [...]}`, `{"b64_json": ...}`
fn extract_top_level(value: &Value) -> Option<Vec<ImageRef>> {
    if let Some(url) = value.get("url").and_then(|v| v.as_str()) {
        return Some(vec![ImageRef::parse(url)]);
    }
    if let Some(items) = value.get("urls").and_then(|v| v.as_array()) {
        return collect_refs(items);
    }
    if let Some(items) = value.get("images").and_then(|v| v.as_array()) {
        return collect_refs(items);
    }
    if let Some(b64) = value
        .get("b64_json")
        .or_else(|| value.get("image_base64"))
        .and_then(|v| v.as_str())
    {
        return Some(vec![ImageRef::parse(b64)]);
    }
    None
}

fn collect_refs(items: &[Value]) -> Option<Vec<ImageRef>> {
    let refs: Vec<ImageRef> = items
        .iter()
        .filter_map(|item| {
            if let Some(s) = item.as_str() {
                return Some(ImageRef::parse(s));
            }
            item.get("url")
                .or_else(|| item.get("image_url"))
                .or_else(|| item.get("b64_json"))
                .or_else(|| item.get("image_base64"))
                .and_then(|v| v.as_str())
                .map(ImageRef::parse)
        })
        .collect();

    if refs.is_empty() {
        None
    } else {
        Some(refs)
    }
}
