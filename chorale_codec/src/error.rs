// Error type for the token codec.
//
// Every failure is local to one event, voice, piece or lookup; callers that
// drive a whole corpus are expected to log the error and skip the item.

use crate::beats::Beats;

/// Result type alias using [`CodecError`].
pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// An input triple that cannot describe an event (e.g. a note with no
    /// pitch, or a rest that also names a pitch).
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A pitch name that does not parse.
    #[error("invalid pitch name {0:?}")]
    InvalidPitch(String),

    /// Vocabulary bounds with `low > high`.
    #[error("empty pitch range {low}..={high}")]
    EmptyRange { low: String, high: String },

    /// The time step must be strictly positive.
    #[error("time step must be positive, got {0}")]
    NonPositiveStep(Beats),

    /// The time step is coarser than the shortest event of a voice.
    #[error("time step {step} is coarser than the shortest event ({min_duration}) in voice {voice:?}")]
    ResolutionTooCoarse {
        voice: String,
        step: Beats,
        min_duration: Beats,
    },

    /// Voices of one piece encode to different lengths.
    #[error("voices have unequal encoded lengths: {}", format_lengths(.lengths))]
    AlignmentMismatch { lengths: Vec<(String, usize)> },

    /// A token, pitch, duration or index outside the vocabulary.
    #[error("out of vocabulary: {0}")]
    OutOfVocabulary(String),

    /// A continuation token with no matching onset before it.
    #[error("orphan continuation {token} at position {position}")]
    OrphanContinuation { position: usize, token: String },

    /// A persisted vocabulary that violates the index layout.
    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_lengths(lengths: &[(String, usize)]) -> String {
    lengths
        .iter()
        .map(|(voice, len)| format!("{voice}={len}"))
        .collect::<Vec<_>>()
        .join(", ")
}
