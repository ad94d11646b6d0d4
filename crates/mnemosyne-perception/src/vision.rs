//! Vision-model batching.
//!
//! The batch is the unit of GPU occupancy: the backend is warmed up once,
//! every screenshot in the batch is served in order, and the backend is
//! released when the batch ends. Out-of-memory mid-batch releases the model
//! and marks the remainder skipped instead of failing the cycle.

use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::GenericImageView;
use serde::{Deserialize, Serialize};

use mnemosyne_types::RoiRect;

use crate::error::{Error, Result};

/// Sentinel recorded for items denied by the resource guard or dropped by an
/// out-of-memory batch. Never persisted - the store keeps null instead.
pub const VRAM_LIMIT_SKIPPED: &str = "[VRAM Limit] Skipped";

pub const DEFAULT_PROMPT: &str = "Describe what you see in this image. Focus on the user \
     interface, actions being performed, and any visible text.";

#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub source: ImageSource,
    pub prompt: String,
    pub roi: Option<RoiRect>,
}

/// One vision model lifecycle: load, serve, unload.
///
/// The external-HTTP backend treats load/unload as no-ops (the model server
/// owns the weights); an in-process backend brackets GPU residency here.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    async fn describe(&self, image_b64: &str, prompt: &str) -> Result<String>;

    async fn cool_down(&self) {}
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// External-model backend: POST each image as base64 to an Ollama-style
/// `/api/generate` endpoint.
pub struct OllamaVisionBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaVisionBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(
            self.client.get(&url).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

#[async_trait]
impl VisionBackend for OllamaVisionBackend {
    async fn describe(&self, image_b64: &str, prompt: &str) -> Result<String> {
        let payload = GenerateRequest {
            model: &self.model,
            prompt,
            images: vec![image_b64.to_string()],
            stream: false,
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let body: GenerateResponse = response.json().await?;

        tracing::debug!(chars = body.response.len(), model = %self.model, "vision response");
        Ok(body.response)
    }
}

/// Drives batches of screenshots through a [`VisionBackend`].
pub struct VisionAgent {
    backend: Box<dyn VisionBackend>,
}

impl VisionAgent {
    pub fn new(backend: Box<dyn VisionBackend>) -> Self {
        Self { backend }
    }

    /// Release whatever the backend holds. Safe to call when idle.
    pub async fn release(&self) {
        self.backend.cool_down().await;
    }

    /// Describe a single screenshot, applying the ROI crop if supplied.
    pub async fn describe_screenshot(&self, request: &VisionRequest) -> Result<String> {
        let bytes = load_bytes(&request.source).await?;
        let bytes = match request.roi {
            Some(roi) => crop_to_roi(&bytes, roi)?,
            None => bytes,
        };

        let encoded = BASE64.encode(&bytes);
        self.backend.describe(&encoded, &request.prompt).await
    }

    /// Process a batch of screenshots in order.
    ///
    /// `admitted` is the guard's verdict for this batch; a denied batch and a
    /// failed warm-up both yield the skip sentinel for every item. Per-item
    /// failures yield `None` unless they look like memory exhaustion, which
    /// releases the backend and skips the rest of the batch.
    pub async fn process_batch(
        &self,
        batch: &[VisionRequest],
        admitted: bool,
    ) -> Vec<Option<String>> {
        if batch.is_empty() {
            return Vec::new();
        }

        if !admitted {
            tracing::info!(items = batch.len(), "vision batch denied by guard");
            return vec![Some(VRAM_LIMIT_SKIPPED.to_string()); batch.len()];
        }

        if let Err(err) = self.backend.warm_up().await {
            tracing::warn!(%err, "vision backend failed to load");
            return vec![Some(VRAM_LIMIT_SKIPPED.to_string()); batch.len()];
        }

        let mut results = Vec::with_capacity(batch.len());
        for request in batch {
            match self.describe_screenshot(request).await {
                Ok(description) => results.push(Some(description)),
                Err(err) if err.is_out_of_memory() => {
                    tracing::warn!(%err, "vision backend out of memory, skipping rest of batch");
                    self.backend.cool_down().await;
                    while results.len() < batch.len() {
                        results.push(Some(VRAM_LIMIT_SKIPPED.to_string()));
                    }
                    return results;
                }
                Err(err) => {
                    tracing::warn!(%err, "vision inference failed");
                    results.push(None);
                }
            }
        }

        self.backend.cool_down().await;
        results
    }
}

async fn load_bytes(source: &ImageSource) -> Result<Vec<u8>> {
    match source {
        ImageSource::Path(path) => Ok(tokio::fs::read(path).await?),
        ImageSource::Bytes(bytes) => Ok(bytes.clone()),
    }
}

/// Crop image bytes to the ROI, clamping the rectangle to image bounds.
/// A degenerate rectangle leaves the image untouched.
pub fn crop_to_roi(bytes: &[u8], roi: RoiRect) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let (width, height) = img.dimensions();

    let left = roi.left.clamp(0, width as i64) as u32;
    let top = roi.top.clamp(0, height as i64) as u32;
    let right = roi.right.clamp(left as i64, width as i64) as u32;
    let bottom = roi.bottom.clamp(top as i64, height as i64) as u32;

    if right <= left || bottom <= top {
        return Ok(bytes.to_vec());
    }

    let cropped = img.crop_imm(left, top, right - left, bottom - top);
    let mut out = Vec::new();
    cropped.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn roi_crop_clamps_to_image_bounds() {
        let bytes = png_bytes(100, 50);
        let roi = RoiRect {
            left: -10,
            top: 10,
            right: 400,
            bottom: 400,
        };
        let cropped = crop_to_roi(&bytes, roi).unwrap();
        let img = image::load_from_memory(&cropped).unwrap();
        assert_eq!(img.dimensions(), (100, 40));
    }

    #[test]
    fn degenerate_roi_leaves_image_untouched() {
        let bytes = png_bytes(10, 10);
        let roi = RoiRect {
            left: 5,
            top: 5,
            right: 5,
            bottom: 9,
        };
        let out = crop_to_roi(&bytes, roi).unwrap();
        assert_eq!(out, bytes);
    }

    struct FlakyBackend {
        calls: AtomicUsize,
        oom_on: Option<usize>,
    }

    #[async_trait]
    impl VisionBackend for FlakyBackend {
        async fn describe(&self, _image_b64: &str, _prompt: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.oom_on {
                return Err(Error::Backend("CUDA out of memory".into()));
            }
            Ok(format!("desc-{call}"))
        }
    }

    fn request(bytes: Vec<u8>) -> VisionRequest {
        VisionRequest {
            source: ImageSource::Bytes(bytes),
            prompt: DEFAULT_PROMPT.to_string(),
            roi: None,
        }
    }

    #[tokio::test]
    async fn denied_batch_is_all_sentinels() {
        let agent = VisionAgent::new(Box::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            oom_on: None,
        }));
        let batch = vec![request(png_bytes(4, 4)), request(png_bytes(4, 4))];

        let results = agent.process_batch(&batch, false).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.as_deref() == Some(VRAM_LIMIT_SKIPPED)));
    }

    #[tokio::test]
    async fn oom_mid_batch_skips_the_remainder() {
        let agent = VisionAgent::new(Box::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            oom_on: Some(1),
        }));
        let batch = vec![
            request(png_bytes(4, 4)),
            request(png_bytes(4, 4)),
            request(png_bytes(4, 4)),
        ];

        let results = agent.process_batch(&batch, true).await;
        assert_eq!(results[0].as_deref(), Some("desc-0"));
        assert_eq!(results[1].as_deref(), Some(VRAM_LIMIT_SKIPPED));
        assert_eq!(results[2].as_deref(), Some(VRAM_LIMIT_SKIPPED));
    }

    #[tokio::test]
    async fn ollama_backend_posts_base64_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "minicpm-v",
                "stream": false,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "a code editor"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = OllamaVisionBackend::new(server.uri(), "minicpm-v").unwrap();
        let agent = VisionAgent::new(Box::new(backend));
        let results = agent
            .process_batch(&[request(png_bytes(8, 8))], true)
            .await;
        assert_eq!(results[0].as_deref(), Some("a code editor"));
    }
}
