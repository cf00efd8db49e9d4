// Piece-level encoding with the cross-voice alignment check.
//
// The encoder handles one voice at a time and makes no promise that voices
// of the same piece come out the same length. Anything that consumes voices
// jointly (the multi-voice predictor, step-synchronous rendering) needs them
// aligned, so `encode_piece` asserts equal lengths and rejects the whole
// piece otherwise. Nothing is padded or truncated.

use crate::beats::Beats;
use crate::error::{CodecError, Result};
use crate::event::{Piece, Voice};
use crate::quantize::{EncodedVoice, QuantizeConfig, decode_voice, encode_voice};
use crate::token::Token;
use crate::vocab::Vocabulary;

/// All voices of one piece, encoded and aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPiece {
    pub title: Option<String>,
    pub step: Beats,
    pub voices: Vec<EncodedVoice>,
}

impl EncodedPiece {
    /// Number of time steps (identical for every voice).
    pub fn steps(&self) -> usize {
        self.voices.first().map_or(0, |v| v.len())
    }

    pub fn voice_ids(&self) -> Vec<&str> {
        self.voices.iter().map(|v| v.id.as_str()).collect()
    }

    /// Per-voice index sequences under `vocab`.
    pub fn indices(&self, vocab: &Vocabulary) -> Result<Vec<Vec<usize>>> {
        self.voices.iter().map(|v| vocab.encode(&v.tokens)).collect()
    }

    /// Decode every voice back into events.
    pub fn decode(&self) -> Piece {
        let voices = self
            .voices
            .iter()
            .map(|v| decode_voice(v.id.clone(), &v.tokens, self.step).0)
            .collect();
        Piece {
            title: self.title.clone(),
            voices,
        }
    }
}

/// Fail with `AlignmentMismatch` unless all lengths are equal.
pub fn check_alignment<'a, I>(lengths: I) -> Result<usize>
where
    I: IntoIterator<Item = (&'a str, usize)>,
{
    let lengths: Vec<(String, usize)> = lengths
        .into_iter()
        .map(|(id, len)| (id.to_string(), len))
        .collect();
    let first = lengths.first().map_or(0, |(_, len)| *len);
    if lengths.iter().all(|(_, len)| *len == first) {
        Ok(first)
    } else {
        Err(CodecError::AlignmentMismatch { lengths })
    }
}

/// Encode every voice of a piece and require equal lengths.
pub fn encode_piece(piece: &Piece, config: &QuantizeConfig) -> Result<EncodedPiece> {
    let voices = piece
        .voices
        .iter()
        .map(|v| encode_voice(v, config))
        .collect::<Result<Vec<_>>>()?;
    check_alignment(voices.iter().map(|v| (v.id.as_str(), v.len())))?;
    Ok(EncodedPiece {
        title: piece.title.clone(),
        step: config.step,
        voices,
    })
}

/// Decode independently generated voices (which need not be aligned).
pub fn decode_piece(voices: &[(String, Vec<Token>)], step: Beats) -> (Piece, usize) {
    let mut orphans = 0;
    let decoded: Vec<Voice> = voices
        .iter()
        .map(|(id, tokens)| {
            let (voice, dropped) = decode_voice(id.clone(), tokens, step);
            orphans += dropped;
            voice
        })
        .collect();
    (Piece::new(decoded), orphans)
}
