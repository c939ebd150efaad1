//! Shared request/response types for provider adapters

use std::time::Duration;

/// A reference to an image, either remote or inline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Remote URL (http or https)
    Url(String),
    /// Inline base64 payload, optionally with a known media type
    Base64 {
        media_type: Option<String>,
        data: String,
    },
}

impl ImageRef {
    /// Parse a raw caller-supplied string into an image reference.
    ///
    /// Accepts plain URLs, `data:<mt>;base64,<payload>` URIs, and bare
    /// base64 payloads.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return ImageRef::Url(trimmed.to_string());
        }
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if let Some((meta, payload)) = rest.split_once(",") {
                let media_type = meta
                    .strip_suffix(";base64")
                    .filter(|m| !m.is_empty())
                    .map(|m| m.to_string());
                return ImageRef::Base64 {
                    media_type,
                    data: payload.to_string(),
                };
            }
        }
        ImageRef::Base64 {
            media_type: None,
            data: trimmed.to_string(),
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, ImageRef::Url(_))
    }

    /// Render as a data URI (base64 variants) or return the URL as-is
    pub fn to_uri(&self) -> String {
        match self {
            ImageRef::Url(url) => url.clone(),
            ImageRef::Base64 { media_type, data } => format!(
                "data:{};base64,{}",
                media_type.as_deref().unwrap_or("image/png"),
                data
            ),
        }
    }
}

/// Desired output representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Retrievable URL
    Url,
    /// Inline base64 JSON field
    B64Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "b64_json" | "base64" => Self::B64Json,
            _ => Self::Url, // Default to URL
        }
    }
}

/// A validated inbound generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub images: Vec<ImageRef>,
    pub model: Option<String>,
    pub size: Option<String>,
    pub n: Option<u32>,
    pub output_format: OutputFormat,
}

impl GenerationRequest {
    pub fn text_only(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
            model: None,
            size: None,
            n: None,
            output_format: OutputFormat::Url,
        }
    }
}

/// A successful generation, before output-format conversion
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub images: Vec<ImageRef>,
    pub model: String,
    pub elapsed: Duration,
}

/// The request handed to a provider adapter after validation and
/// model/size resolution
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub prompt: String,
    pub images: Vec<ImageRef>,
    pub model: String,
    pub size: String,
    pub n: u32,
}

/// Per-call options for a provider adapter
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub request_id: String,
    pub timeout: Duration,
    /// Ask the upstream for inline base64 output where it supports choosing
    pub want_inline_base64: bool,
}

/// What an adapter hands back
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub images: Vec<ImageRef>,
    pub model: Option<String>,
}
