/// Result type for mnemosyne-perception operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the perception layer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR engine unavailable")]
    OcrUnavailable,

    #[error("vision backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Whether this failure looks like GPU memory exhaustion. The batch
    /// driver unloads the model and marks the remainder of the batch skipped.
    pub fn is_out_of_memory(&self) -> bool {
        match self {
            Error::Backend(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("out of memory") || msg.contains("cuda") || msg.contains("vram")
            }
            _ => false,
        }
    }
}
