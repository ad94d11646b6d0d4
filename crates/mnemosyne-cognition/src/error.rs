/// Result type for mnemosyne-cognition operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur when talking to model endpoints
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed model response: {0}")]
    BadResponse(String),
}
