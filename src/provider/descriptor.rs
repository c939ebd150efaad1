//! Static capability descriptors for upstream providers

use crate::config::ProviderConfig;
use crate::error::{AppError, Result};
use crate::provider::types::{GenerationRequest, OutputFormat};

/// Immutable capability/config data for one upstream provider.
/// Constructed once at startup and read-only thereafter.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub text_to_image: bool,
    pub image_to_image: bool,
    pub multi_image: bool,
    pub asynchronous: bool,
    pub max_input_images: usize,
    /// Representations the upstream can emit natively
    pub output_formats: Vec<OutputFormat>,
    pub default_model: String,
    pub models: Vec<String>,
    pub default_size: String,
    pub sizes: Vec<String>,
}

impl ProviderDescriptor {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            text_to_image: config.text_to_image,
            image_to_image: config.image_to_image,
            multi_image: config.multi_image,
            asynchronous: config.execution == "async",
            max_input_images: config.max_input_images,
            output_formats: vec![OutputFormat::Url, OutputFormat::B64Json],
            default_model: config.default_model.clone(),
            models: if config.models.is_empty() {
                vec![config.default_model.clone()]
            } else {
                config.models.clone()
            },
            default_size: config.default_size.clone(),
            sizes: if config.sizes.is_empty() {
                vec![config.default_size.clone()]
            } else {
                config.sizes.clone()
            },
        }
    }
}

/// Whether the descriptor lists the given model
pub fn supports_model(descriptor: &ProviderDescriptor, model: &str) -> bool {
    descriptor.models.iter().any(|m| m == model)
}

/// Pick the model to send upstream: the requested one when the provider
/// lists it, the provider default otherwise.
pub fn resolve_model(descriptor: &ProviderDescriptor, requested: Option<&str>) -> String {
    match requested {
        Some(model) if supports_model(descriptor, model) => model.to_string(),
        _ => descriptor.default_model.clone(),
    }
}

/// Pick the size to send upstream, falling back to the provider default
/// for unknown sizes.
pub fn resolve_size(descriptor: &ProviderDescriptor, requested: Option<&str>) -> String {
    match requested {
        Some(size) if descriptor.sizes.iter().any(|s| s == size) => size.to_string(),
        _ => descriptor.default_size.clone(),
    }
}

/// Validate an inbound request against a provider's capabilities.
/// Failures here are terminal and never retried.
pub fn validate_request(descriptor: &ProviderDescriptor, request: &GenerationRequest) -> Result<()> {
    if request.prompt.trim().is_empty() && request.images.is_empty() {
        return Err(AppError::InvalidRequest(
            "a prompt or at least one input image is required".to_string(),
        ));
    }

    if request.images.is_empty() && !descriptor.text_to_image {
        return Err(AppError::InvalidRequest(format!(
            "provider '{}' requires an input image",
            descriptor.name
        )));
    }

    if !request.images.is_empty() && !descriptor.image_to_image {
        return Err(AppError::InvalidRequest(format!(
            "provider '{}' does not support image input",
            descriptor.name
        )));
    }

    if request.images.len() > 1 && !descriptor.multi_image {
        return Err(AppError::InvalidRequest(format!(
            "provider '{}' accepts a single input image",
            descriptor.name
        )));
    }

    if request.images.len() > descriptor.max_input_images {
        return Err(AppError::InvalidRequest(format!(
            "provider '{}' accepts at most {} input images, got {}",
            descriptor.name,
            descriptor.max_input_images,
            request.images.len()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::ImageRef;

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            name: "testprov".to_string(),
            text_to_image: true,
            image_to_image: true,
            multi_image: false,
            asynchronous: false,
            max_input_images: 1,
            output_formats: vec![OutputFormat::Url],
            default_model: "base-v1".to_string(),
            models: vec!["base-v1".to_string(), "base-v2".to_string()],
            default_size: "1024x1024".to_string(),
            sizes: vec!["1024x1024".to_string(), "512x512".to_string()],
        }
    }

    #[test]
    fn test_resolve_model() {
        let d = descriptor();
        assert_eq!(resolve_model(&d, Some("base-v2")), "base-v2");
        assert_eq!(resolve_model(&d, Some("other")), "base-v1");
        assert_eq!(resolve_model(&d, None), "base-v1");
    }

    #[test]
    fn test_resolve_size() {
        let d = descriptor();
        assert_eq!(resolve_size(&d, Some("512x512")), "512x512");
        assert_eq!(resolve_size(&d, Some("999x999")), "1024x1024");
    }

    #[test]
    fn test_validate_empty_request() {
        let d = descriptor();
        let request = GenerationRequest::text_only("  ");
        assert!(validate_request(&d, &request).is_err());
    }

    #[test]
    fn test_validate_multi_image_rejected() {
        let d = descriptor();
        let mut request = GenerationRequest::text_only("two cats");
        request.images = vec![
            ImageRef::Url("https://a/1.png".to_string()),
            ImageRef::Url("https://a/2.png".to_string()),
        ];
        assert!(validate_request(&d, &request).is_err());
    }

    #[test]
    fn test_validate_image_input_unsupported() {
        let mut d = descriptor();
        d.image_to_image = false;
        let mut request = GenerationRequest::text_only("edit this");
        request.images = vec![ImageRef::Url("https://a/1.png".to_string())];
        assert!(validate_request(&d, &request).is_err());
    }

    #[test]
    fn test_validate_ok() {
        let d = descriptor();
        let mut request = GenerationRequest::text_only("a cat");
        assert!(validate_request(&d, &request).is_ok());
        request.images = vec![ImageRef::Url("https://a/1.png".to_string())];
        assert!(validate_request(&d, &request).is_ok());
    }
}
