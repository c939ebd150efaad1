//! Submit+poll provider behavior against a scripted status endpoint

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use image_unigate::config::{CredentialPattern, ProviderConfig};
use image_unigate::error::AppError;
use image_unigate::provider::async_http::AsyncHttpProvider;
use image_unigate::provider::traits::ProviderAdapter;
use image_unigate::provider::types::{CallOptions, ImageRef, ProviderRequest};

fn async_config(endpoint: &str, poll_max_attempts: u32) -> ProviderConfig {
    ProviderConfig {
        name: "driftrender".to_string(),
        execution: "async".to_string(),
        endpoint: endpoint.to_string(),
        credential_pattern: CredentialPattern::Uuid,
        credentials: vec![],
        text_to_image: true,
        image_to_image: false,
        multi_image: false,
        max_input_images: 1,
        default_model: "drift-v2".to_string(),
        models: vec!["drift-v2".to_string()],
        default_size: "1024x1024".to_string(),
        sizes: vec!["1024x1024".to_string()],
        timeout_ms: 2_000,
        poll_interval_ms: 10,
        poll_max_attempts,
        enabled: true,
    }
}

fn provider_request() -> ProviderRequest {
    ProviderRequest {
        prompt: "a glacier".to_string(),
        images: vec![],
        model: "drift-v2".to_string(),
        size: "1024x1024".to_string(),
        n: 1,
    }
}

fn call_options(adapter: &AsyncHttpProvider) -> CallOptions {
    CallOptions {
        request_id: "req-test".to_string(),
        timeout: adapter.call_budget(),
        want_inline_base64: false,
    }
}

async fn mount_submit(server: &MockServer, task_id: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/images/tasks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "task_id": task_id })),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_pending_then_success_with_nested_output() {
    let server = MockServer::start().await;
    mount_submit(&server, "task-7").await;

    // First two polls report pending, the third succeeds
    Mock::given(method("GET"))
        .and(path("/v1/images/tasks/task-7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "pending" })),
        )
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/images/tasks/task-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": { "url": "https://cdn.example.com/glacier.png" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = AsyncHttpProvider::new(&async_config(&server.uri(), 10)).unwrap();
    let opts = call_options(&adapter);

    let response = adapter
        .generate("3f2b8c41-9d7a-4e55-b1c2-0a9f8e7d6c5b", &provider_request(), &opts)
        .await
        .unwrap();

    assert_eq!(
        response.images,
        vec![ImageRef::Url("https://cdn.example.com/glacier.png".to_string())]
    );
}

#[tokio::test]
async fn test_task_failure_surfaces_classified_error() {
    let server = MockServer::start().await;
    mount_submit(&server, "task-8").await;

    Mock::given(method("GET"))
        .and(path("/v1/images/tasks/task-8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "failed",
            "reason": "rate limit exceeded on render farm",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = AsyncHttpProvider::new(&async_config(&server.uri(), 10)).unwrap();
    let opts = call_options(&adapter);

    let error = adapter
        .generate("3f2b8c41-9d7a-4e55-b1c2-0a9f8e7d6c5b", &provider_request(), &opts)
        .await
        .unwrap_err();

    match error {
        AppError::Upstream { kind, .. } => {
            assert_eq!(kind, image_unigate::classify::ErrorKind::RateLimit);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_unusable_status_responses_abort_early() {
    let server = MockServer::start().await;
    mount_submit(&server, "task-9").await;

    // Statusless garbage forever; the invalid-response streak must abort
    // the task well before the 50-attempt budget
    Mock::given(method("GET"))
        .and(path("/v1/images/tasks/task-9"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "shrug": true })),
        )
        .mount(&server)
        .await;

    let adapter = AsyncHttpProvider::new(&async_config(&server.uri(), 50)).unwrap();
    let opts = call_options(&adapter);

    let error = adapter
        .generate("3f2b8c41-9d7a-4e55-b1c2-0a9f8e7d6c5b", &provider_request(), &opts)
        .await
        .unwrap_err();
    assert!(matches!(error, AppError::Upstream { .. }));

    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().ends_with("/task-9"))
        .count();
    assert!(polls < 50, "aborted after {} polls", polls);
}

#[tokio::test]
async fn test_never_terminal_times_out() {
    let server = MockServer::start().await;
    mount_submit(&server, "task-10").await;

    Mock::given(method("GET"))
        .and(path("/v1/images/tasks/task-10"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "running" })),
        )
        .expect(3)
        .mount(&server)
        .await;

    let adapter = AsyncHttpProvider::new(&async_config(&server.uri(), 3)).unwrap();
    let opts = call_options(&adapter);

    let error = adapter
        .generate("3f2b8c41-9d7a-4e55-b1c2-0a9f8e7d6c5b", &provider_request(), &opts)
        .await
        .unwrap_err();
    assert!(matches!(error, AppError::Timeout(_)));
}

#[tokio::test]
async fn test_submission_without_task_id_fails() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/tasks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accepted": true })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let adapter = AsyncHttpProvider::new(&async_config(&server.uri(), 3)).unwrap();
    let opts = call_options(&adapter);

    let error = adapter
        .generate("3f2b8c41-9d7a-4e55-b1c2-0a9f8e7d6c5b", &provider_request(), &opts)
        .await
        .unwrap_err();
    assert!(matches!(error, AppError::Upstream { .. }));

    // No polling should have happened
    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() != "/v1/images/tasks")
        .count();
    assert_eq!(polls, 0);
}
