// Error types for chorale_gen.

use chorale_codec::CodecError;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Tokenization, vocabulary or alignment failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// A transition row with no observed successors was selected.
    #[error("degenerate distribution: token index {row} has no observed successors")]
    DegenerateDistribution { row: usize },

    /// Generation hit its step ceiling without a terminal token.
    #[error("generation stopped after {generated} steps without a terminal token")]
    NonTerminatingGeneration { generated: usize },

    /// Training data or a seed window with the wrong number of voices.
    #[error("expected {expected} voices, found {found}")]
    VoiceCountMismatch { expected: usize, found: usize },

    /// No window of the requested width fits in any piece.
    #[error("no training example of window {window} fits the corpus")]
    EmptyTrainingSet { window: usize },

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// MIDI writing error.
    #[error("render: {0}")]
    Render(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
