// Corpus of pieces, persisted as JSON.
//
// A corpus is an ordered list of `Piece`s in the raw-triple event format
// (`{"rest": false, "pitch": "C4", "duration": "1/2"}`). Encoding a corpus
// runs every piece through the quantization encoder and the alignment check;
// pieces that fail are logged and skipped, and the failures are returned
// alongside the encoded pieces so callers can report them.

use crate::error::Result;
use chorale_codec::{Beats, CodecError, EncodedPiece, Piece, QuantizeConfig, encode_piece};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    pub pieces: Vec<Piece>,
}

/// A piece the encoder rejected, by corpus position.
#[derive(Debug)]
pub struct Rejected {
    pub index: usize,
    pub title: Option<String>,
    pub error: CodecError,
}

impl Corpus {
    pub fn new(pieces: Vec<Piece>) -> Self {
        Corpus { pieces }
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Encode every piece, skipping (and returning) the ones that fail.
    pub fn encode(&self, config: &QuantizeConfig) -> (Vec<EncodedPiece>, Vec<Rejected>) {
        let mut encoded = Vec::with_capacity(self.pieces.len());
        let mut rejected = Vec::new();
        for (index, piece) in self.pieces.iter().enumerate() {
            match encode_piece(piece, config) {
                Ok(e) => {
                    let skipped: usize = e.voices.iter().map(|v| v.skipped).sum();
                    if skipped > 0 {
                        tracing::warn!(index, skipped, "dropped events with non-positive duration");
                    }
                    encoded.push(e);
                }
                Err(error) => {
                    tracing::warn!(index, title = ?piece.title, %error, "skipping piece");
                    rejected.push(Rejected {
                        index,
                        title: piece.title.clone(),
                        error,
                    });
                }
            }
        }
        (encoded, rejected)
    }

    /// Per-piece, per-voice total durations.
    pub fn total_durations(&self) -> Vec<Vec<(String, Beats)>> {
        self.pieces.iter().map(Piece::total_durations).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorale_codec::beats::{beats, whole};
    use chorale_codec::{Event, Voice, normalize};

    fn corpus() -> Corpus {
        let c4 = normalize("C4").unwrap();
        let c3 = normalize("C3").unwrap();
        let good = Piece::new(vec![
            Voice::new("Soprano", vec![Event::note(c4, whole(2))]),
            Voice::new("Bass", vec![Event::rest(whole(1)), Event::note(c3, whole(1))]),
        ]);
        let mut misaligned = Piece::new(vec![
            Voice::new("Soprano", vec![Event::note(c4, whole(2))]),
            Voice::new("Bass", vec![Event::note(c3, beats(9, 4))]),
        ]);
        misaligned.title = Some("bad".into());
        Corpus::new(vec![good, misaligned])
    }

    #[test]
    fn test_encode_skips_failing_pieces() {
        let (encoded, rejected) = corpus().encode(&QuantizeConfig::default());
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[0].steps(), 8);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].index, 1);
        assert_eq!(rejected[0].title.as_deref(), Some("bad"));
        assert!(matches!(
            rejected[0].error,
            CodecError::AlignmentMismatch { .. }
        ));
    }

    #[test]
    fn test_total_durations_per_piece() {
        let totals = corpus().total_durations();
        assert_eq!(totals[0], vec![("Soprano".into(), whole(2)), ("Bass".into(), whole(2))]);
        assert_eq!(totals[1][1], ("Bass".into(), beats(9, 4)));
    }

    #[test]
    fn test_json_round_trip() {
        let corpus = corpus();
        let restored = Corpus::from_json(&corpus.to_json().unwrap()).unwrap();
        assert_eq!(restored, corpus);
    }
}
