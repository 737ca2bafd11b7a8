//! Error types for the turn-taking engine.

/// Top-level error type for the voice turn-taking engine.
///
/// Every variant is recoverable: the orchestrator reports the message and
/// returns to a state where the operation can be attempted again.
#[derive(Debug, thiserror::Error)]
pub enum HarkError {
    /// Audio stream error (stream build/start failure, unsupported format).
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone unavailable or access denied.
    #[error("microphone unavailable: {0}")]
    Device(String),

    /// Speech-to-text transcription error.
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Text-to-speech synthesis or playback error.
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    /// Reply delivery (send callback) failure.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HarkError>;
