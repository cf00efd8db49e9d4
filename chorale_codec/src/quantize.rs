// Quantization codec: variable-duration events <-> fixed-timestep tokens.
//
// Encoding: each event of duration d > 0 covers `max(1, floor(d / step))`
// time steps. The first step carries the onset token (the pitch, or `rest`);
// the remaining steps carry continuation tokens (`cont<pitch>` for notes,
// `rest` again for rests). Events shorter than one step still take one slot,
// so the codec rounds every duration down to the grid, except that nothing
// ever vanishes.
//
// Decoding: scan left to right, collapse each onset plus its maximal run of
// matching continuations into one event of `step * (1 + run)` beats. Boundary
// tokens are skipped. A continuation that does not continue the open event is
// an orphan: it is dropped and counted, never merged into a neighbouring note.
//
// `decode(encode(v))` preserves the (rest, pitch) sequence exactly, except
// that adjacent rests merge, and it reproduces durations up to the floor
// rounding. Applying encode/decode again is a fixed point.

use crate::beats::{self, Beats, serde_beats};
use crate::error::{CodecError, Result};
use crate::event::{Event, Sound, Voice};
use crate::token::Token;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Time resolution and strictness of the encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizeConfig {
    /// Duration of one time step, in beats.
    #[serde(with = "serde_beats")]
    pub step: Beats,
    /// Fail with `ResolutionTooCoarse` when the step is longer than the
    /// shortest event of a voice. When false, such events are rounded up to
    /// one step and a warning is logged.
    pub reject_coarse: bool,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        QuantizeConfig {
            step: beats::beats(1, 4),
            reject_coarse: true,
        }
    }
}

impl QuantizeConfig {
    pub fn with_step(step: Beats) -> Self {
        QuantizeConfig {
            step,
            ..Default::default()
        }
    }

    fn checked_step(&self) -> Result<Beats> {
        if self.step > Beats::zero() {
            Ok(self.step)
        } else {
            Err(CodecError::NonPositiveStep(self.step))
        }
    }
}

/// Encoder output for one voice.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVoice {
    pub id: String,
    pub tokens: Vec<Token>,
    /// Shortest positive raw duration in the source voice.
    pub min_duration: Option<Beats>,
    /// Sum of positive raw durations in the source voice.
    pub source_duration: Beats,
    /// Events dropped for having a non-positive duration.
    pub skipped: usize,
}

impl EncodedVoice {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Encode one voice at the configured time step.
///
/// The resolution check runs before any token is produced.
pub fn encode_voice(voice: &Voice, config: &QuantizeConfig) -> Result<EncodedVoice> {
    let step = config.checked_step()?;
    let min_duration = voice.min_duration();

    if let Some(min) = min_duration {
        if step > min {
            if config.reject_coarse {
                return Err(CodecError::ResolutionTooCoarse {
                    voice: voice.id.clone(),
                    step,
                    min_duration: min,
                });
            }
            tracing::warn!(
                voice = %voice.id,
                %step,
                %min,
                "time step is coarser than the shortest event; short events round up to one step"
            );
        }
    }

    let mut tokens = Vec::new();
    let mut skipped = 0;
    for (position, event) in voice.events.iter().enumerate() {
        if event.duration <= Beats::zero() {
            tracing::debug!(
                voice = %voice.id,
                position,
                duration = %event.duration,
                "dropping event with non-positive duration"
            );
            skipped += 1;
            continue;
        }
        let steps = beats::steps_for(event.duration, step);
        let (onset, hold) = match event.sound {
            Sound::Rest => (Token::Rest, Token::Rest),
            Sound::Note(p) => (Token::Onset(p), Token::Hold(p)),
        };
        tokens.push(onset);
        tokens.extend(std::iter::repeat_n(hold, steps - 1));
    }

    Ok(EncodedVoice {
        id: voice.id.clone(),
        tokens,
        min_duration,
        source_duration: voice.total_duration(),
        skipped,
    })
}

/// Decoder output: reconstructed events plus the count of dropped orphans.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub events: Vec<Event>,
    pub orphans: usize,
}

/// Walk a token sequence as maximal runs.
///
/// Calls `on_run(start, len, sound)` for every onset run and
/// `on_orphan(position, token)` for every continuation with no open event.
fn scan_runs(
    tokens: &[Token],
    mut on_run: impl FnMut(usize, usize, Sound),
    mut on_orphan: impl FnMut(usize, Token),
) {
    let mut i = 0;
    while i < tokens.len() {
        let (sound, continuation) = match tokens[i] {
            Token::Boundary => {
                i += 1;
                continue;
            }
            Token::Hold(_) => {
                on_orphan(i, tokens[i]);
                i += 1;
                continue;
            }
            Token::Rest => (Sound::Rest, Token::Rest),
            Token::Onset(p) => (Sound::Note(p), Token::Hold(p)),
        };
        let mut j = i + 1;
        while j < tokens.len() && tokens[j] == continuation {
            j += 1;
        }
        on_run(i, j - i, sound);
        i = j;
    }
}

/// Decode a token sequence into events, dropping orphan continuations.
pub fn decode_tokens(tokens: &[Token], step: Beats) -> Decoded {
    let mut events = Vec::new();
    let mut orphans = 0;
    scan_runs(
        tokens,
        |_, len, sound| {
            events.push(Event {
                sound,
                duration: step * Beats::from_integer(len as i64),
            })
        },
        |position, token| {
            tracing::debug!(position, %token, "dropping orphan continuation");
            orphans += 1;
        },
    );
    Decoded { events, orphans }
}

/// Decode into a named voice.
pub fn decode_voice(id: impl Into<String>, tokens: &[Token], step: Beats) -> (Voice, usize) {
    let decoded = decode_tokens(tokens, step);
    (Voice::new(id, decoded.events), decoded.orphans)
}

/// Strict check for externally supplied sequences: fails on the first
/// orphan continuation.
pub fn validate_tokens(tokens: &[Token]) -> Result<()> {
    let mut first_orphan = None;
    scan_runs(
        tokens,
        |_, _, _| {},
        |position, token| {
            first_orphan.get_or_insert((position, token));
        },
    );
    match first_orphan {
        Some((position, token)) => Err(CodecError::OrphanContinuation {
            position,
            token: token.to_string(),
        }),
        None => Ok(()),
    }
}

/// For every position, the quantized duration of the event that position
/// belongs to. Boundaries and orphans count as a single step.
pub fn step_spans(tokens: &[Token], step: Beats) -> Vec<Beats> {
    let mut spans = vec![step; tokens.len()];
    scan_runs(
        tokens,
        |start, len, _| {
            let span = step * Beats::from_integer(len as i64);
            spans[start..start + len].fill(span);
        },
        |_, _| {},
    );
    spans
}
