//! End-to-end orchestrator scenarios against stubbed upstreams

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use image_unigate::config::{CredentialPattern, ImageBudgetConfig, PoolConfig, ProviderConfig};
use image_unigate::error::AppError;
use image_unigate::img::{ImageFetcher, ImageNormalizer};
use image_unigate::orchestrator::{Mode, Orchestrator};
use image_unigate::pool::{CredentialPool, FailureKind};
use image_unigate::provider::registry::ProviderRegistry;
use image_unigate::provider::sync_http::SyncHttpProvider;
use image_unigate::provider::types::{GenerationRequest, ImageRef, OutputFormat};

fn provider_config(name: &str, endpoint: &str, prefix: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        execution: "sync".to_string(),
        endpoint: endpoint.to_string(),
        credential_pattern: CredentialPattern::Prefix {
            value: prefix.to_string(),
        },
        credentials: vec![],
        text_to_image: true,
        image_to_image: true,
        multi_image: true,
        max_input_images: 4,
        default_model: "uni-image-1".to_string(),
        models: vec!["uni-image-1".to_string()],
        default_size: "1024x1024".to_string(),
        sizes: vec!["1024x1024".to_string(), "512x512".to_string()],
        timeout_ms: 5_000,
        poll_interval_ms: 10,
        poll_max_attempts: 10,
        enabled: true,
    }
}

fn pool_config() -> PoolConfig {
    PoolConfig {
        rate_limit_cooldown_secs: 3600,
        auth_cooldown_secs: 3600,
        exhausted_cooldown_secs: 3600,
        failure_threshold: 3,
        max_attempts: 3,
    }
}

fn build_orchestrator(
    registry: ProviderRegistry,
    pool: Arc<CredentialPool>,
) -> Orchestrator {
    let fetcher = ImageFetcher::new(Duration::from_secs(2)).unwrap();
    let normalizer = ImageNormalizer::new(fetcher.clone(), &ImageBudgetConfig::default());
    Orchestrator::new(Arc::new(registry), pool, normalizer, fetcher, 3)
}

fn sync_registry(config: &ProviderConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(SyncHttpProvider::new(config).unwrap()));
    registry
}

#[tokio::test]
async fn test_relay_mode_prompt_only_returns_url_image() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(header("authorization", "Bearer pk-relay-credential"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "url": "https://cdn.example.com/out.png" }],
            "model": "uni-image-1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = provider_config("pixelforge", &server.uri(), "pk-");
    let registry = sync_registry(&config);
    let pool = Arc::new(CredentialPool::new(pool_config()));
    let orchestrator = build_orchestrator(registry, pool);

    let output = orchestrator
        .generate(
            GenerationRequest::text_only("a lighthouse at dusk"),
            Mode::Relay {
                credential: "pk-relay-credential".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(
        output.images,
        vec![ImageRef::Url("https://cdn.example.com/out.png".to_string())]
    );
    assert_eq!(output.model, "uni-image-1");
}

#[tokio::test]
async fn test_backend_mode_skips_rate_limited_credential() {
    let server = MockServer::start().await;

    // Only the healthy credential is accepted
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(header("authorization", "Bearer pk-good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "url": "https://cdn.example.com/out.png" }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = provider_config("pixelforge", &server.uri(), "pk-");
    let registry = sync_registry(&config);

    let pool = Arc::new(CredentialPool::new(pool_config()));
    pool.add_credentials(
        "pixelforge",
        vec!["pk-limited".to_string(), "pk-good".to_string()],
    );
    pool.report_failure("pixelforge", "pk-limited", FailureKind::RateLimit);

    let orchestrator = build_orchestrator(registry, pool);

    let mut request = GenerationRequest::text_only("a fox");
    request.model = Some("uni-image-1".to_string());

    let output = orchestrator.generate(request, Mode::Backend).await.unwrap();
    assert_eq!(output.images.len(), 1);
}

#[tokio::test]
async fn test_backend_mode_all_rejected_fails_without_network_call() {
    let server = MockServer::start().await;

    let config = provider_config("pixelforge", &server.uri(), "pk-");
    let registry = sync_registry(&config);

    let pool = Arc::new(CredentialPool::new(pool_config()));
    pool.add_credentials(
        "pixelforge",
        vec!["pk-a".to_string(), "pk-b".to_string()],
    );
    pool.report_failure("pixelforge", "pk-a", FailureKind::AuthError);
    pool.report_failure("pixelforge", "pk-b", FailureKind::AuthError);

    let orchestrator = build_orchestrator(registry, pool);

    let mut request = GenerationRequest::text_only("a fox");
    request.model = Some("uni-image-1".to_string());

    let error = orchestrator
        .generate(request, Mode::Backend)
        .await
        .unwrap_err();
    assert!(matches!(error, AppError::NoAvailableCredential(_)));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_backend_mode_rotates_after_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(header("authorization", "Bearer pk-first"))
        .respond_with(
            ResponseTemplate::new(429).set_body_string("rate limit reached for requests"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(header("authorization", "Bearer pk-second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "images": [{ "b64_json": "QUJD" }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = provider_config("pixelforge", &server.uri(), "pk-");
    let registry = sync_registry(&config);

    let pool = Arc::new(CredentialPool::new(pool_config()));
    pool.add_credentials(
        "pixelforge",
        vec!["pk-first".to_string(), "pk-second".to_string()],
    );

    let orchestrator = build_orchestrator(registry, pool.clone());

    let mut request = GenerationRequest::text_only("a fox");
    request.model = Some("uni-image-1".to_string());

    let output = orchestrator.generate(request, Mode::Backend).await.unwrap();
    assert_eq!(output.images.len(), 1);

    // The rate-limited credential is now cooling down
    let (total, healthy, cooling) = pool.health_summary("pixelforge");
    assert_eq!((total, healthy, cooling), (2, 1, 1));
}

#[tokio::test]
async fn test_relay_mode_does_not_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let config = provider_config("pixelforge", &server.uri(), "pk-");
    let registry = sync_registry(&config);
    let pool = Arc::new(CredentialPool::new(pool_config()));
    let orchestrator = build_orchestrator(registry, pool);

    let error = orchestrator
        .generate(
            GenerationRequest::text_only("a fox"),
            Mode::Relay {
                credential: "pk-anything".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(error, AppError::Upstream { .. }));
}

#[tokio::test]
async fn test_moderation_failure_is_not_retried_in_backend_mode() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string("your prompt was flagged by the safety system"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = provider_config("pixelforge", &server.uri(), "pk-");
    let registry = sync_registry(&config);

    let pool = Arc::new(CredentialPool::new(pool_config()));
    pool.add_credentials(
        "pixelforge",
        vec!["pk-a".to_string(), "pk-b".to_string()],
    );

    let orchestrator = build_orchestrator(registry, pool);

    let mut request = GenerationRequest::text_only("something blocked");
    request.model = Some("uni-image-1".to_string());

    let error = orchestrator
        .generate(request, Mode::Backend)
        .await
        .unwrap_err();
    match error {
        AppError::Upstream { kind, message, .. } => {
            assert_eq!(kind, image_unigate::classify::ErrorKind::ModerationBlocked);
            // The caller sees the canned message, not the upstream text
            assert!(!message.contains("flagged"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_validation_failure_is_terminal() {
    let server = MockServer::start().await;
    let config = provider_config("pixelforge", &server.uri(), "pk-");
    let registry = sync_registry(&config);
    let pool = Arc::new(CredentialPool::new(pool_config()));
    let orchestrator = build_orchestrator(registry, pool);

    // Empty prompt and no images
    let error = orchestrator
        .generate(
            GenerationRequest::text_only(""),
            Mode::Relay {
                credential: "pk-relay".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(error, AppError::InvalidRequest(_)));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_b64_output_requested_inlines_url_results() {
    let server = MockServer::start().await;

    let png: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x00,
    ];

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "url": format!("{}/files/out.png", server.uri()) }],
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/out.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png.to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let config = provider_config("pixelforge", &server.uri(), "pk-");
    let registry = sync_registry(&config);
    let pool = Arc::new(CredentialPool::new(pool_config()));
    let orchestrator = build_orchestrator(registry, pool);

    let mut request = GenerationRequest::text_only("a fox");
    request.output_format = OutputFormat::B64Json;

    let output = orchestrator
        .generate(
            request,
            Mode::Relay {
                credential: "pk-relay".to_string(),
            },
        )
        .await
        .unwrap();

    match &output.images[0] {
        ImageRef::Base64 { media_type, .. } => {
            assert_eq!(media_type.as_deref(), Some("image/png"));
        }
        other => panic!("expected inlined base64, got {:?}", other),
    }
}
