//! Remote image probing and bounded download

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, Result};

/// HTTP client wrapper for image sources
#[derive(Clone)]
pub struct ImageFetcher {
    client: Client,
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Header-only size probe. Returns the reported Content-Length, or
    /// None when the server does not say or the probe fails.
    pub async fn probe_size(&self, url: &str) -> Option<u64> {
        let response = self.client.head(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        // HEAD responses carry no body, so the declared length has to come
        // from the header itself
        let size: u64 = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()?;
        debug!(url = %url, size, "Probed remote image");
        Some(size)
    }

    /// Download a remote image, rejecting payloads over `limit` bytes
    pub async fn download(&self, url: &str, limit: usize) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "image source returned {}",
                response.status()
            )));
        }

        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(AppError::InvalidRequest(format!(
                    "remote image is {} bytes, limit is {}",
                    length, limit
                )));
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() > limit {
            return Err(AppError::InvalidRequest(format!(
                "remote image is {} bytes, limit is {}",
                bytes.len(),
                limit
            )));
        }

        debug!(url = %url, size = bytes.len(), "Downloaded remote image");
        Ok(bytes.to_vec())
    }
}
