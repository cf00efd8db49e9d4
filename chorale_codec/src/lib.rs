// Chorale token codec.
//
// Turns polyphonic note/rest event streams into fixed-timestep token
// sequences and back. Each voice is resampled onto a grid of `step` beats;
// sustained events become an onset token followed by continuation tokens, so
// every voice of a piece advances one token per time step and voices can be
// consumed jointly by sequence models.
//
// Architecture:
// - beats.rs: exact rational durations + serde helpers
// - pitch.rs: the single pitch-normalization table (flats/naturals only)
// - token.rs: Boundary / Rest / Onset / Hold tokens and their text forms
// - event.rs: flat Event / Voice / Piece records, raw triples, `EventSink`
// - vocab.rs: vocabulary builder + frozen token <-> index mapper, duration
//   buckets
// - quantize.rs: per-voice encoder and decoder
// - align.rs: piece-level encoding with the equal-length check
//
// The vocabulary is built once and passed by reference to everything that
// needs it; there is no global state.

pub mod align;
pub mod beats;
pub mod error;
pub mod event;
pub mod pitch;
pub mod quantize;
pub mod token;
pub mod vocab;

pub use align::{EncodedPiece, check_alignment, decode_piece, encode_piece};
pub use beats::Beats;
pub use error::{CodecError, Result};
pub use event::{Event, EventSink, Piece, RawEvent, Sound, Voice};
pub use pitch::{Pitch, normalize};
pub use quantize::{
    Decoded, EncodedVoice, QuantizeConfig, decode_tokens, decode_voice, encode_voice, step_spans,
    validate_tokens,
};
pub use token::Token;
pub use vocab::{BOUNDARY_INDEX, DurationVocab, REST_INDEX, Vocabulary, VocabularyConfig};
