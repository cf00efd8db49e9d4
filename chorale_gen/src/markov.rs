// Transition-count (bigram) sampler over vocabulary indices.
//
// One `TransitionTable` per voice: a dense square matrix of counts where
// `count(prev, next)` is the number of times `next` directly followed `prev`
// in the training sequences. Training sequences are framed with the boundary
// index at both ends, so row 0 holds the opening distribution and column 0
// the closing one.
//
// Sampling starts at the boundary and repeatedly draws the next index from
// the current row, normalized by its sum, until the boundary is drawn again
// or the caller's maximum length is reached. Hitting the ceiling is not an
// error: the result is returned with `truncated` set, and `into_result`
// converts it into `NonTerminatingGeneration` for callers that want strictness.
// A row with no observations cannot be normalized and fails with
// `DegenerateDistribution`.
//
// Tables only accumulate during construction (`observe`, `merge`) and are
// read-only while sampling. Persisted as JSON dense matrices (`{"rows":
// [[...], ...]}`).

use crate::error::{Error, Result};
use chorale_codec::{BOUNDARY_INDEX, CodecError, EncodedPiece, Vocabulary};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Square count matrix for one voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTable", into = "RawTable")]
pub struct TransitionTable {
    size: usize,
    counts: Vec<u64>,
}

#[derive(Serialize, Deserialize)]
struct RawTable {
    rows: Vec<Vec<u64>>,
}

impl TryFrom<RawTable> for TransitionTable {
    type Error = String;

    fn try_from(raw: RawTable) -> std::result::Result<Self, String> {
        let size = raw.rows.len();
        if let Some((i, row)) = raw.rows.iter().enumerate().find(|(_, r)| r.len() != size) {
            return Err(format!(
                "row {i} has {} columns, expected {size}",
                row.len()
            ));
        }
        Ok(TransitionTable {
            size,
            counts: raw.rows.into_iter().flatten().collect(),
        })
    }
}

impl From<TransitionTable> for RawTable {
    fn from(table: TransitionTable) -> Self {
        RawTable {
            rows: table.counts.chunks(table.size.max(1)).map(<[u64]>::to_vec).collect(),
        }
    }
}

/// Output of one sampling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sampled {
    /// Drawn indices, excluding the initial boundary. Ends with the boundary
    /// index unless `truncated`.
    pub indices: Vec<usize>,
    /// The maximum length was reached before the boundary was drawn.
    pub truncated: bool,
}

impl Sampled {
    /// The drawn indices without the terminal boundary.
    pub fn body(&self) -> &[usize] {
        match self.indices.split_last() {
            Some((&BOUNDARY_INDEX, rest)) if !self.truncated => rest,
            _ => &self.indices,
        }
    }

    /// Strict form: a truncated run becomes `NonTerminatingGeneration`.
    pub fn into_result(self) -> Result<Vec<usize>> {
        if self.truncated {
            Err(Error::NonTerminatingGeneration {
                generated: self.indices.len(),
            })
        } else {
            Ok(self.indices)
        }
    }
}

impl TransitionTable {
    /// An all-zero table over `size` indices.
    pub fn new(size: usize) -> Self {
        TransitionTable {
            size,
            counts: vec![0; size * size],
        }
    }

    /// Count every adjacent pair of a sequence framed with the boundary at
    /// both ends.
    pub fn build<'a, I>(size: usize, sequences: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [usize]>,
    {
        let mut table = TransitionTable::new(size);
        for sequence in sequences {
            table.observe(sequence)?;
        }
        Ok(table)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn check(&self, index: usize) -> Result<usize> {
        if index < self.size {
            Ok(index)
        } else {
            Err(CodecError::OutOfVocabulary(format!(
                "index {index} (table size {})",
                self.size
            ))
            .into())
        }
    }

    /// Frame `sequence` with the boundary index at both ends and count it.
    pub fn observe(&mut self, sequence: &[usize]) -> Result<()> {
        let mut framed = Vec::with_capacity(sequence.len() + 2);
        framed.push(BOUNDARY_INDEX);
        framed.extend_from_slice(sequence);
        framed.push(BOUNDARY_INDEX);
        self.observe_framed(&framed)
    }

    /// Count the adjacent pairs of a sequence that already carries its own
    /// framing. The table is left untouched if any index is out of range.
    pub fn observe_framed(&mut self, sequence: &[usize]) -> Result<()> {
        for &index in sequence {
            self.check(index)?;
        }
        for pair in sequence.windows(2) {
            self.counts[pair[0] * self.size + pair[1]] += 1;
        }
        Ok(())
    }

    pub fn count(&self, prev: usize, next: usize) -> u64 {
        if prev < self.size && next < self.size {
            self.counts[prev * self.size + next]
        } else {
            0
        }
    }

    /// Successor counts of `prev`.
    pub fn row(&self, prev: usize) -> Result<&[u64]> {
        let prev = self.check(prev)?;
        Ok(&self.counts[prev * self.size..(prev + 1) * self.size])
    }

    /// Add another table's counts into this one.
    pub fn merge(&mut self, other: &TransitionTable) -> Result<()> {
        if other.size != self.size {
            return Err(Error::Config(format!(
                "cannot merge transition tables of size {} and {}",
                self.size, other.size
            )));
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        Ok(())
    }

    /// Draw one successor of `prev`.
    pub fn sample_next(&self, prev: usize, rng: &mut impl Rng) -> Result<usize> {
        let row = self.row(prev)?;
        let total: u64 = row.iter().sum();
        if total == 0 {
            return Err(Error::DegenerateDistribution { row: prev });
        }
        let target = rng.random_range(0..total);
        let mut cumulative = 0;
        for (next, &weight) in row.iter().enumerate() {
            cumulative += weight;
            if cumulative > target {
                return Ok(next);
            }
        }
        // Last observed successor as fallback
        Ok(row.iter().rposition(|&w| w > 0).unwrap_or(BOUNDARY_INDEX))
    }

    /// Sample one sequence starting from the boundary, drawing at most
    /// `max_length` indices.
    pub fn sample(&self, max_length: usize, rng: &mut impl Rng) -> Result<Sampled> {
        let mut indices = Vec::new();
        let mut current = BOUNDARY_INDEX;
        while indices.len() < max_length {
            current = self.sample_next(current, rng)?;
            indices.push(current);
            if current == BOUNDARY_INDEX {
                return Ok(Sampled {
                    indices,
                    truncated: false,
                });
            }
        }
        tracing::debug!(max_length, "sampling reached its length ceiling");
        Ok(Sampled {
            indices,
            truncated: true,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// The table for one voice identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceModel {
    pub id: String,
    pub table: TransitionTable,
}

/// Independent per-voice tables over one vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkovModels {
    pub voices: Vec<VoiceModel>,
}

impl MarkovModels {
    /// One table per voice id, in first-seen order, accumulated over every
    /// piece that has that voice.
    pub fn from_pieces(pieces: &[EncodedPiece], vocab: &Vocabulary) -> Result<Self> {
        let mut voices: Vec<VoiceModel> = Vec::new();
        for piece in pieces {
            for voice in &piece.voices {
                let indices = vocab.encode(&voice.tokens)?;
                let position = match voices.iter().position(|m| m.id == voice.id) {
                    Some(p) => p,
                    None => {
                        voices.push(VoiceModel {
                            id: voice.id.clone(),
                            table: TransitionTable::new(vocab.len()),
                        });
                        voices.len() - 1
                    }
                };
                voices[position].table.observe(&indices)?;
            }
        }
        tracing::info!(voices = voices.len(), pieces = pieces.len(), "built transition tables");
        Ok(MarkovModels { voices })
    }

    pub fn voice(&self, id: &str) -> Option<&TransitionTable> {
        self.voices.iter().find(|m| m.id == id).map(|m| &m.table)
    }

    /// Sample every voice independently.
    pub fn sample(&self, max_length: usize, rng: &mut impl Rng) -> Result<Vec<(String, Sampled)>> {
        self.voices
            .iter()
            .map(|m| Ok((m.id.clone(), m.table.sample(max_length, rng)?)))
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorale_codec::beats::whole;
    use chorale_codec::{
        Event, Piece, QuantizeConfig, REST_INDEX, Voice, VocabularyConfig, encode_piece, normalize,
    };
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_framed_single_sequence_counts() {
        let mut table = TransitionTable::new(6);
        table.observe_framed(&[0, 5, 5, 0]).unwrap();
        assert_eq!(table.count(0, 5), 1);
        assert_eq!(table.count(5, 5), 1);
        assert_eq!(table.count(5, 0), 1);
        let total: u64 = (0..6).flat_map(|r| table.row(r).unwrap().to_vec()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_sample_from_single_sequence() {
        let mut table = TransitionTable::new(6);
        table.observe_framed(&[0, 5, 5, 0]).unwrap();
        let mut saw_exact = false;
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let sampled = table.sample(1000, &mut rng).unwrap();
            assert!(!sampled.truncated);
            assert_eq!(sampled.indices.first(), Some(&5));
            assert_eq!(sampled.indices.last(), Some(&0));
            assert!(sampled.body().iter().all(|&i| i == 5));
            saw_exact |= sampled.indices == vec![5, 5, 0];
        }
        assert!(saw_exact);
    }

    #[test]
    fn test_deterministic_chain() {
        let table = TransitionTable::build(4, [&[2usize, 3][..]]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let sampled = table.sample(10, &mut rng).unwrap();
        assert_eq!(sampled.indices, vec![2, 3, 0]);
        assert_eq!(sampled.body(), &[2, 3]);
        assert_eq!(sampled.into_result().unwrap(), vec![2, 3, 0]);
    }

    #[test]
    fn test_counts_are_order_independent() {
        let a: &[usize] = &[1, 2, 2, 3];
        let b: &[usize] = &[3, 1];
        let forward = TransitionTable::build(4, [a, b]).unwrap();
        let backward = TransitionTable::build(4, [b, a]).unwrap();
        assert_eq!(forward, backward);

        let mut merged = TransitionTable::build(4, [a]).unwrap();
        merged.merge(&TransitionTable::build(4, [b]).unwrap()).unwrap();
        assert_eq!(merged, forward);
    }

    #[test]
    fn test_out_of_range_index_rejected_without_partial_update() {
        let mut table = TransitionTable::new(3);
        assert!(matches!(
            table.observe(&[1, 7]),
            Err(Error::Codec(CodecError::OutOfVocabulary(_)))
        ));
        assert_eq!(table, TransitionTable::new(3));
    }

    #[test]
    fn test_zero_row_is_degenerate() {
        // 1 is only ever the final element of a pre-framed sequence, so its
        // row is empty.
        let mut table = TransitionTable::new(3);
        table.observe_framed(&[0, 1]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            table.sample(10, &mut rng),
            Err(Error::DegenerateDistribution { row: 1 })
        ));
        assert!(matches!(
            TransitionTable::new(3).sample(10, &mut rng),
            Err(Error::DegenerateDistribution { row: 0 })
        ));
    }

    #[test]
    fn test_max_length_truncates() {
        // 0 -> 1 -> 1 -> 1 ... never returns to the boundary.
        let mut table = TransitionTable::new(2);
        table.observe_framed(&[0, 1, 1]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let sampled = table.sample(5, &mut rng).unwrap();
        assert!(sampled.truncated);
        assert_eq!(sampled.indices, vec![1; 5]);
        assert_eq!(sampled.body(), &[1; 5]);
        assert!(matches!(
            sampled.into_result(),
            Err(Error::NonTerminatingGeneration { generated: 5 })
        ));
        assert!(table.sample(0, &mut rng).unwrap().indices.is_empty());
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let table = TransitionTable::build(
            5,
            [&[1usize, 2, 3, 4][..], &[2, 2, 4][..], &[3, 1, 1, 2, 4][..]],
        )
        .unwrap();
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..10)
                .map(|_| table.sample(50, &mut rng).unwrap().indices)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(11), run(11));
        for indices in run(12) {
            assert!(indices.len() <= 50);
            assert!(indices.iter().all(|&i| i < 5));
        }
    }

    #[test]
    fn test_json_dense_matrix() {
        let mut table = TransitionTable::new(2);
        table.observe(&[1]).unwrap();
        let json = table.to_json().unwrap();
        assert_eq!(json, r#"{"rows":[[0,1],[1,0]]}"#);
        assert_eq!(TransitionTable::from_json(&json).unwrap(), table);
        assert!(TransitionTable::from_json(r#"{"rows":[[0,1],[1]]}"#).is_err());
    }

    #[test]
    fn test_models_from_encoded_pieces() {
        let vocab = Vocabulary::build(&VocabularyConfig::default()).unwrap();
        let c4 = normalize("C4").unwrap();
        let g2 = normalize("G2").unwrap();
        let piece = Piece::new(vec![
            Voice::new("Soprano", vec![Event::note(c4, whole(1))]),
            Voice::new("Bass", vec![Event::note(g2, whole(1))]),
        ]);
        let encoded = encode_piece(&piece, &QuantizeConfig::default()).unwrap();
        let models = MarkovModels::from_pieces(&[encoded.clone(), encoded], &vocab).unwrap();
        assert_eq!(models.voices.len(), 2);

        let soprano = models.voice("Soprano").unwrap();
        let onset = vocab.index_of(&chorale_codec::Token::Onset(c4)).unwrap();
        let hold = vocab.index_of(&chorale_codec::Token::Hold(c4)).unwrap();
        assert_eq!(soprano.count(BOUNDARY_INDEX, onset), 2);
        assert_eq!(soprano.count(onset, hold), 2);
        assert_eq!(soprano.count(hold, hold), 4);
        assert_eq!(soprano.count(hold, BOUNDARY_INDEX), 2);

        let mut rng = StdRng::seed_from_u64(1);
        let sampled = models.sample(1000, &mut rng).unwrap();
        assert_eq!(sampled[0].0, "Soprano");
        let soprano = &sampled[0].1;
        assert!(!soprano.truncated);
        assert_eq!(soprano.indices[0], onset);
        assert_eq!(soprano.indices.last(), Some(&BOUNDARY_INDEX));
        assert!(soprano.body()[1..].iter().all(|&i| i == hold));
    }

    #[test]
    fn test_save_and_load() {
        let vocab = Vocabulary::build(&VocabularyConfig::default()).unwrap();
        let piece = Piece::new(vec![
            Voice::new("Soprano", vec![Event::note(normalize("E4").unwrap(), whole(1))]),
            Voice::new("Bass", vec![Event::rest(whole(1))]),
        ]);
        let encoded = encode_piece(&piece, &QuantizeConfig::default()).unwrap();
        let models = MarkovModels::from_pieces(&[encoded], &vocab).unwrap();

        let path = std::env::temp_dir().join(format!("chorale_tables_{}.json", std::process::id()));
        models.save(&path).unwrap();
        let loaded = MarkovModels::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, models);
        assert_eq!(loaded.voice("Bass").unwrap().count(REST_INDEX, REST_INDEX), 3);
        assert!(MarkovModels::load(&path).is_err());
    }
}
