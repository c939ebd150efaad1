//! HTTP handlers for the caller-facing operations

use axum::{
    extract::{FromRequest, Multipart, State},
    http::{header, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::extract::{extract_from_messages, ChatMessage};
use crate::error::{AppError, Result};
use crate::img::base64 as b64;
use crate::orchestrator::Mode;
use crate::provider::types::{GenerationRequest, ImageRef, OutputFormat};
use crate::AppState;

/// Maximum accepted JSON body size for edit requests
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Direct generation request (OpenAI images API shape)
#[derive(Debug, Deserialize)]
pub struct ImagesRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub response_format: Option<String>,
}

/// Edit request as JSON; `image` may be a single reference or a list
#[derive(Debug, Deserialize)]
pub struct EditsRequest {
    pub prompt: String,
    #[serde(default)]
    pub image: ImageField,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub response_format: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ImageField {
    One(String),
    Many(Vec<String>),
}

impl Default for ImageField {
    fn default() -> Self {
        ImageField::Many(Vec::new())
    }
}

impl ImageField {
    fn into_refs(self) -> Vec<ImageRef> {
        match self {
            ImageField::One(raw) => vec![ImageRef::parse(&raw)],
            ImageField::Many(raws) => raws.iter().map(|r| ImageRef::parse(r)).collect(),
        }
    }
}

/// Chat-style request; only the image-relevant fields are read
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    pub created: i64,
    pub data: Vec<ImageData>,
}

#[derive(Debug, Serialize)]
pub struct ImageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
}

impl ImageData {
    fn from_ref(image: &ImageRef, format: OutputFormat) -> Self {
        match format {
            OutputFormat::Url => Self {
                // Base64-only outputs are wrapped as data URIs
                url: Some(image.to_uri()),
                b64_json: None,
            },
            OutputFormat::B64Json => match image {
                ImageRef::Base64 { data, .. } => Self {
                    url: None,
                    b64_json: Some(data.clone()),
                },
                // Conversion is best-effort; a URL that could not be
                // inlined stays a URL
                ImageRef::Url(url) => Self {
                    url: Some(url.clone()),
                    b64_json: None,
                },
            },
        }
    }
}

/// Resolve the operating mode for a request from its bearer credential.
/// A key matching a provider's format is relayed; a gateway access token
/// selects backend mode; anything else is rejected.
pub fn resolve_mode(state: &AppState, headers: &HeaderMap) -> Result<Mode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.trim_start_matches("Bearer ").trim().to_string())
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        if !state.settings.auth.enabled {
            return Ok(Mode::Backend);
        }
        return Err(AppError::AuthenticationFailed(
            "API key required. Provide via Authorization header: 'Bearer YOUR_API_KEY'"
                .to_string(),
        ));
    };

    if state.registry.detect(&token).is_some() {
        return Ok(Mode::Relay { credential: token });
    }

    // If no access tokens are configured, allow backend mode for all callers
    if !state.settings.auth.enabled
        || state.settings.auth.access_tokens.is_empty()
        || state.settings.auth.access_tokens.contains(&token)
    {
        return Ok(Mode::Backend);
    }

    Err(AppError::AuthenticationFailed("Invalid API key".to_string()))
}

/// POST /v1/images/generations
pub async fn images_generations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ImagesRequest>,
) -> Result<Json<ImagesResponse>> {
    let mode = resolve_mode(&state, &headers)?;
    let format = OutputFormat::from_str(body.response_format.as_deref().unwrap_or("url"));

    let request = GenerationRequest {
        prompt: body.prompt,
        images: Vec::new(),
        model: body.model,
        size: body.size,
        n: body.n,
        output_format: format,
    };

    let output = state.orchestrator.generate(request, mode).await?;
    Ok(Json(images_response(&output.images, format)))
}

/// POST /v1/images/edits (JSON or multipart)
pub async fn images_edits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
) -> Result<Json<ImagesResponse>> {
    let mode = resolve_mode(&state, &headers)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let (body, images) = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::InvalidRequest(format!("invalid multipart body: {}", e)))?;
        parse_edit_multipart(multipart).await?
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| AppError::InvalidRequest(format!("could not read body: {}", e)))?;
        let EditsRequest {
            prompt,
            image,
            model,
            n,
            size,
            response_format,
        } = serde_json::from_slice(&bytes)?;
        (
            ImagesRequest {
                prompt,
                model,
                n,
                size,
                response_format,
            },
            image.into_refs(),
        )
    };

    let format = OutputFormat::from_str(body.response_format.as_deref().unwrap_or("url"));
    let request = GenerationRequest {
        prompt: body.prompt,
        images,
        model: body.model,
        size: body.size,
        n: body.n,
        output_format: format,
    };

    let output = state.orchestrator.generate(request, mode).await?;
    Ok(Json(images_response(&output.images, format)))
}

/// POST /v1/chat/completions, image generation driven from chat messages
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>> {
    let mode = resolve_mode(&state, &headers)?;
    let extracted = extract_from_messages(&body.messages);

    let request = GenerationRequest {
        prompt: extracted.prompt,
        images: extracted.images,
        model: body.model.clone(),
        size: None,
        n: None,
        output_format: OutputFormat::Url,
    };

    let output = state.orchestrator.generate(request, mode).await?;

    let content = output
        .images
        .iter()
        .map(|image| format!("![image]({})", image.to_uri()))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(Json(json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": output.model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content,
            },
            "finish_reason": "stop",
        }],
    })))
}

/// GET /v1/models listing every model each provider carries
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut data = Vec::new();
    for adapter in state.registry.all() {
        let descriptor = adapter.descriptor();
        for model in &descriptor.models {
            data.push(json!({
                "id": model,
                "object": "model",
                "owned_by": descriptor.name,
            }));
        }
    }
    Json(json!({ "object": "list", "data": data }))
}

/// GET /health with liveness plus credential pool summaries
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let pools: Vec<serde_json::Value> = state
        .registry
        .all()
        .iter()
        .map(|adapter| {
            let (total, healthy, cooling) = state.pool.health_summary(adapter.name());
            json!({
                "provider": adapter.name(),
                "credentials": { "total": total, "healthy": healthy, "cooling": cooling },
            })
        })
        .collect();

    Json(json!({ "status": "ok", "pools": pools }))
}

fn images_response(images: &[ImageRef], format: OutputFormat) -> ImagesResponse {
    ImagesResponse {
        created: chrono::Utc::now().timestamp(),
        data: images
            .iter()
            .map(|image| ImageData::from_ref(image, format))
            .collect(),
    }
}

async fn parse_edit_multipart(mut multipart: Multipart) -> Result<(ImagesRequest, Vec<ImageRef>)> {
    let mut body = ImagesRequest {
        prompt: String::new(),
        model: None,
        n: None,
        size: None,
        response_format: None,
    };
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("invalid multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "prompt" => body.prompt = field_text(field).await?,
            "model" => body.model = Some(field_text(field).await?),
            "size" => body.size = Some(field_text(field).await?),
            "response_format" => body.response_format = Some(field_text(field).await?),
            "n" => {
                body.n = field_text(field).await?.parse().ok();
            }
            "image" | "image[]" => {
                let declared = field.content_type().map(|c| c.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::InvalidRequest(format!("could not read image upload: {}", e))
                })?;
                let media_type = declared
                    .or_else(|| b64::detect_media_type(&bytes).map(|m| m.to_string()));
                images.push(ImageRef::Base64 {
                    media_type,
                    data: b64::encode(&bytes),
                });
            }
            _ => {}
        }
    }

    Ok((body, images))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("invalid multipart field: {}", e)))
}
