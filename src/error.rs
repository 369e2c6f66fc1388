//! Error types for the avatar playback and animation pipeline.

/// Top-level error type for the avatar runtime.
#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    /// Audio device, stream, or unlock error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed audio chunk (bad base64 or truncated PCM16 payload).
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Scene description could not be loaded.
    #[error("scene error: {0}")]
    Scene(String),

    /// Outbound dispatch to the remote agent failed.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AvatarError>;
