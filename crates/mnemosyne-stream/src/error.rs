/// Result type for mnemosyne-stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the stream ingest layer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("broker not connected: {0}")]
    NotConnected(String),
}
