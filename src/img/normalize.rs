//! Size-budget normalization of input images
//!
//! Inbound images arrive as remote URLs or inline base64 with wildly
//! varying sizes. Anything already within the byte budget passes through
//! untouched; oversized payloads are re-encoded down a descending JPEG
//! quality ladder, shrinking the raster between ladders until the target
//! budget is met or the resize passes run out. Normalization is
//! best-effort: any decode, encode or fetch error falls back to the
//! original payload for that image.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::config::ImageBudgetConfig;
use crate::img::base64 as b64;
use crate::img::fetch::ImageFetcher;
use crate::provider::types::ImageRef;

/// Descending JPEG quality ladder
const QUALITY_LADDER: &[u8] = &[85, 75, 65, 55, 45, 35, 25];

/// Raster shrink ratio per resize pass, in percent
const RESIZE_RATIO_PCT: u32 = 85;

/// Bounded number of resize passes
const MAX_RESIZE_PASSES: u32 = 4;

/// Hard ceiling on how much we will download to attempt compression
const DOWNLOAD_CEILING_FACTOR: usize = 8;

/// Normalizes image payloads under a byte budget
#[derive(Clone)]
pub struct ImageNormalizer {
    fetcher: ImageFetcher,
    max_bytes: usize,
    target_bytes: usize,
}

impl ImageNormalizer {
    pub fn new(fetcher: ImageFetcher, budget: &ImageBudgetConfig) -> Self {
        Self {
            fetcher,
            max_bytes: budget.max_bytes,
            target_bytes: budget.target_bytes,
        }
    }

    /// Normalize a batch of images, preserving order and count.
    /// Never fails; each entry independently falls back to its original
    /// form on any error.
    pub async fn normalize(&self, images: Vec<ImageRef>) -> Vec<ImageRef> {
        let mut out = Vec::with_capacity(images.len());
        for image in images {
            out.push(self.normalize_one(image).await);
        }
        out
    }

    async fn normalize_one(&self, image: ImageRef) -> ImageRef {
        match &image {
            ImageRef::Url(url) => {
                // Cheap existence/size probe first to avoid downloads
                if let Some(size) = self.fetcher.probe_size(url).await {
                    if size as usize <= self.max_bytes {
                        return image;
                    }
                }

                let limit = self.max_bytes.saturating_mul(DOWNLOAD_CEILING_FACTOR);
                let bytes = match self.fetcher.download(url, limit).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Could not materialize remote image, passing through");
                        return image;
                    }
                };

                if bytes.len() <= self.max_bytes {
                    return image;
                }

                match self.compress(bytes).await {
                    Some(compressed) => compressed,
                    None => image,
                }
            }
            ImageRef::Base64 { data, .. } => {
                let bytes = match b64::decode(data) {
                    Ok(bytes) => bytes,
                    Err(_) => return image,
                };

                if bytes.len() <= self.max_bytes {
                    return image;
                }

                match self.compress(bytes).await {
                    Some(compressed) => compressed,
                    None => image,
                }
            }
        }
    }

    /// Run the compression loop on a blocking thread. Returns None when the
    /// payload should pass through unmodified.
    async fn compress(&self, original: Vec<u8>) -> Option<ImageRef> {
        let target = self.target_bytes;
        let original_len = original.len();

        let result =
            tokio::task::spawn_blocking(move || compress_to_budget(&original, target)).await;

        match result {
            Ok(Some(best)) if best.len() < original_len => {
                debug!(
                    original = original_len,
                    compressed = best.len(),
                    "Compressed oversized image"
                );
                Some(ImageRef::Base64 {
                    media_type: Some("image/jpeg".to_string()),
                    data: b64::encode(&best),
                })
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Compression task failed, passing through");
                None
            }
        }
    }
}

/// Iterate the quality ladder, shrinking the raster between ladders, and
/// keep the smallest candidate seen. Returns early once a candidate meets
/// `target`. Animated formats and undecodable payloads return None.
fn compress_to_budget(bytes: &[u8], target: usize) -> Option<Vec<u8>> {
    // Compression is defined for single-frame rasters only
    if matches!(image::guess_format(bytes), Ok(ImageFormat::Gif)) {
        return None;
    }

    let decoded = image::load_from_memory(bytes).ok()?;
    let mut current = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut best: Option<Vec<u8>> = None;

    for pass in 0..=MAX_RESIZE_PASSES {
        for &quality in QUALITY_LADDER {
            let candidate = match encode_jpeg(&current, quality) {
                Ok(candidate) => candidate,
                Err(_) => return best,
            };

            let better = best.as_ref().map_or(true, |b| candidate.len() < b.len());
            if better {
                best = Some(candidate);
            }

            if best.as_ref().map_or(false, |b| b.len() <= target) {
                return best;
            }
        }

        if pass < MAX_RESIZE_PASSES {
            let (w, h) = (current.width(), current.height());
            let nw = (w * RESIZE_RATIO_PCT / 100).max(1);
            let nh = (h * RESIZE_RATIO_PCT / 100).max(1);
            current = current.resize_exact(nw, nh, image::imageops::FilterType::Lanczos3);
        }
    }

    best
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    let encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
    img.write_with_encoder(encoder)?;
    Ok(buf)
}
