//! Error types for speech-transformer-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Audio processing error (WAV decoding, STFT).
    #[error("audio: {0}")]
    Audio(String),

    /// Batch or input tensor does not match the configured shape.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// Malformed dataset metadata.
    #[error("dataset: {0}")]
    Dataset(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<hound::Error> for Error {
    fn from(error: hound::Error) -> Self {
        Error::Audio(error.to_string())
    }
}
