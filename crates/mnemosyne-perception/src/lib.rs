mod error;
mod ocr;
mod pipeline;
mod ui_tree;
mod vision;

pub use error::{Error, Result};
pub use ocr::{DEFAULT_LANGUAGES, OcrEngine};
pub use pipeline::{PerceivedEvent, PerceptionPipeline};
pub use ui_tree::{NullUiTreeSource, UiElement, UiNodeId, UiTreeExtractor, UiTreeSource};
pub use vision::{
    ImageSource, OllamaVisionBackend, VRAM_LIMIT_SKIPPED, VisionAgent, VisionBackend,
    VisionRequest,
};
