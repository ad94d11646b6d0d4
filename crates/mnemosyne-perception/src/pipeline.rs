//! Per-event enrichment chain: sanitize title, accessibility tree, OCR
//! fallback, then one vision batch over the whole event batch.

use std::path::PathBuf;

use mnemosyne_core::Sanitizer;
use mnemosyne_types::CaptureEvent;

use crate::ocr::OcrEngine;
use crate::ui_tree::UiTreeExtractor;
use crate::vision::{ImageSource, VRAM_LIMIT_SKIPPED, VisionAgent, VisionRequest};

const VISION_PROMPT: &str = "Describe this user interface";

/// Enrichment output for one event. Any field may be null; the store keeps
/// whatever survived the fallback chain.
#[derive(Debug, Clone)]
pub struct PerceivedEvent {
    pub event_id: i64,
    pub sanitized_title: String,
    pub accessibility_tree: Option<String>,
    pub ocr_content: Option<String>,
    pub vlm_description: Option<String>,
}

pub struct PerceptionPipeline {
    sanitizer: Sanitizer,
    ui_tree: UiTreeExtractor,
    ocr: OcrEngine,
    vision: VisionAgent,
    screenshots_dir: PathBuf,
}

impl PerceptionPipeline {
    pub fn new(
        sanitizer: Sanitizer,
        ui_tree: UiTreeExtractor,
        ocr: OcrEngine,
        vision: VisionAgent,
        screenshots_dir: PathBuf,
    ) -> Self {
        Self {
            sanitizer,
            ui_tree,
            ocr,
            vision,
            screenshots_dir,
        }
    }

    /// The vision agent, for callers that batch outside the event chain.
    pub fn vision(&self) -> &VisionAgent {
        &self.vision
    }

    /// Run the fallback chain over a batch of events, preserving input order.
    ///
    /// Steps 1-3 run per event; the vision call is batched across the whole
    /// input with `vision_admitted` carrying the guard's verdict.
    pub async fn process_batch(
        &self,
        events: &[CaptureEvent],
        vision_admitted: bool,
    ) -> Vec<PerceivedEvent> {
        let mut perceived = Vec::with_capacity(events.len());
        let mut vision_batch: Vec<VisionRequest> = Vec::new();
        let mut vision_slots: Vec<usize> = Vec::new();

        for (index, event) in events.iter().enumerate() {
            let sanitized_title = self.sanitizer.clean_text(&event.window_title);

            let accessibility_tree = event
                .window_hwnd
                .and_then(|hwnd| self.ui_tree.extract_context(hwnd));

            let ocr_content = if accessibility_tree.is_none() {
                self.run_ocr(event).await
            } else {
                None
            };

            if let Some(source) = self.image_source(event) {
                vision_batch.push(VisionRequest {
                    source,
                    prompt: VISION_PROMPT.to_string(),
                    roi: event.roi,
                });
                vision_slots.push(index);
            }

            perceived.push(PerceivedEvent {
                event_id: event.id,
                sanitized_title,
                accessibility_tree,
                ocr_content,
                vlm_description: None,
            });
        }

        if !vision_batch.is_empty() {
            let results = self.vision.process_batch(&vision_batch, vision_admitted).await;
            for (slot, result) in vision_slots.into_iter().zip(results) {
                // The skip sentinel stays out of the store: the row keeps null.
                perceived[slot].vlm_description =
                    result.filter(|desc| desc != VRAM_LIMIT_SKIPPED && !desc.is_empty());
            }
        }

        perceived
    }

    async fn run_ocr(&self, event: &CaptureEvent) -> Option<String> {
        if let Some(bytes) = &event.screenshot_data {
            match self.ocr.extract_from_bytes(bytes).await {
                Ok(text) if !text.is_empty() => return Some(self.sanitizer.clean_text(&text)),
                Ok(_) => return None,
                Err(err) => {
                    tracing::debug!(event_id = event.id, %err, "OCR from bytes failed");
                    return None;
                }
            }
        }

        let path = event.screenshot_file(&self.screenshots_dir)?;
        if !path.exists() {
            return None;
        }

        match self.ocr.extract_text(&path).await {
            Ok(text) if !text.is_empty() => Some(self.sanitizer.clean_text(&text)),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(event_id = event.id, %err, "OCR failed");
                None
            }
        }
    }

    fn image_source(&self, event: &CaptureEvent) -> Option<ImageSource> {
        if let Some(bytes) = &event.screenshot_data {
            return Some(ImageSource::Bytes(bytes.clone()));
        }
        let path = event.screenshot_file(&self.screenshots_dir)?;
        path.exists().then_some(ImageSource::Path(path))
    }
}
