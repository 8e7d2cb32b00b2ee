//! Error types for the wakecue core.

/// Top-level error type for scheduling and spoken-audio arbitration.
#[derive(Debug, thiserror::Error)]
pub enum WakeError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech synthesis or clip decoding error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Invalid trigger input or schedule computation error.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// Audio session arbitration error (backend start, handle lifecycle).
    #[error("arbiter error: {0}")]
    Arbiter(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WakeError>;
