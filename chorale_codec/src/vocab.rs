// Token vocabulary and index mapping.
//
// The vocabulary is built once from a pitch range and then frozen: insertion
// order fixes every token's integer index, and every encoder, decoder and
// model receives the same `Vocabulary` by reference. Layout:
//
//   0: <end>   boundary / terminal token
//   1: rest
//   2..: pitches in ascending height, each onset immediately followed by its
//        continuation token when `holds` is enabled
//
// Lookups are partial: unknown tokens and indices fail with
// `CodecError::OutOfVocabulary`, never alias to the boundary index.
//
// `DurationVocab` is the companion mapping for duration buckets used by the
// multi-voice predictor: the sorted set of distinct bucket values seen in a
// corpus.

use crate::beats::{Beats, serde_beats};
use crate::error::{CodecError, Result};
use crate::pitch::{Pitch, normalize};
use crate::token::Token;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Index of the boundary / terminal token in every vocabulary.
pub const BOUNDARY_INDEX: usize = 0;
/// Index of the rest token in every vocabulary.
pub const REST_INDEX: usize = 1;

/// Parameters for building a vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Lowest pitch, inclusive.
    pub low: Pitch,
    /// Highest pitch, inclusive.
    pub high: Pitch,
    /// Pair every pitch with a continuation token. Required for quantized
    /// encoding of anything longer than one step.
    pub holds: bool,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        VocabularyConfig {
            low: normalize("E2").expect("E2 is a valid pitch"),
            high: normalize("C5").expect("C5 is a valid pitch"),
            holds: true,
        }
    }
}

/// Enumerate normalized pitch names between two bounds, de-duplicated in
/// first-seen order.
///
/// With one canonical spelling per semitone no duplicates can arise today;
/// the check keeps the contract if the spelling table ever changes.
pub fn pitch_names(low: Pitch, high: Pitch) -> Vec<Pitch> {
    let mut seen = BTreeSet::new();
    let mut pitches = Vec::new();
    for pitch in Pitch::range(low, high) {
        if seen.insert(pitch.to_string()) {
            pitches.push(pitch);
        }
    }
    pitches
}

/// Frozen bidirectional token <-> index mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: Vec<Token>,
    index: BTreeMap<Token, usize>,
}

impl Vocabulary {
    /// Build the vocabulary for a pitch range.
    pub fn build(config: &VocabularyConfig) -> Result<Self> {
        if config.low > config.high {
            return Err(CodecError::EmptyRange {
                low: config.low.to_string(),
                high: config.high.to_string(),
            });
        }
        let mut tokens = vec![Token::Boundary, Token::Rest];
        for pitch in pitch_names(config.low, config.high) {
            tokens.push(Token::Onset(pitch));
            if config.holds {
                tokens.push(Token::Hold(pitch));
            }
        }
        Self::from_tokens(tokens)
    }

    /// Freeze an explicit token list, validating the fixed layout.
    pub fn from_tokens(tokens: Vec<Token>) -> Result<Self> {
        if tokens.get(BOUNDARY_INDEX) != Some(&Token::Boundary) {
            return Err(CodecError::InvalidVocabulary(
                "index 0 must be the boundary token".into(),
            ));
        }
        if tokens.get(REST_INDEX) != Some(&Token::Rest) {
            return Err(CodecError::InvalidVocabulary(
                "index 1 must be the rest token".into(),
            ));
        }
        let mut index = BTreeMap::new();
        for (i, &token) in tokens.iter().enumerate() {
            if index.insert(token, i).is_some() {
                return Err(CodecError::InvalidVocabulary(format!(
                    "duplicate token {token}"
                )));
            }
        }
        Ok(Vocabulary { tokens, index })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// All tokens in index order.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.index.contains_key(token)
    }

    pub fn index_of(&self, token: &Token) -> Result<usize> {
        self.index
            .get(token)
            .copied()
            .ok_or_else(|| CodecError::OutOfVocabulary(format!("token {token}")))
    }

    pub fn token(&self, index: usize) -> Result<Token> {
        self.tokens.get(index).copied().ok_or_else(|| {
            CodecError::OutOfVocabulary(format!("index {index} (vocabulary size {})", self.len()))
        })
    }

    /// Map a token sequence to indices; fails on the first unknown token.
    pub fn encode(&self, tokens: &[Token]) -> Result<Vec<usize>> {
        tokens.iter().map(|t| self.index_of(t)).collect()
    }

    /// Map indices back to tokens; fails on the first unknown index.
    pub fn decode(&self, indices: &[usize]) -> Result<Vec<Token>> {
        indices.iter().map(|&i| self.token(i)).collect()
    }

    /// Serialize as a JSON list of token strings.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.tokens)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let tokens: Vec<Token> = serde_json::from_str(json)?;
        Self::from_tokens(tokens)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}

/// Sorted mapping between duration buckets and indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDurations", into = "RawDurations")]
pub struct DurationVocab {
    durations: Vec<Beats>,
}

#[derive(Serialize, Deserialize)]
struct RawDurations {
    #[serde(with = "beats_list")]
    durations: Vec<Beats>,
}

impl From<DurationVocab> for RawDurations {
    fn from(vocab: DurationVocab) -> Self {
        RawDurations {
            durations: vocab.durations,
        }
    }
}

impl TryFrom<RawDurations> for DurationVocab {
    type Error = CodecError;

    fn try_from(raw: RawDurations) -> Result<Self> {
        DurationVocab::from_sorted(raw.durations)
    }
}

impl DurationVocab {
    /// Adopt an existing bucket list, which must be positive and strictly
    /// ascending (index lookups are binary searches).
    pub fn from_sorted(durations: Vec<Beats>) -> Result<Self> {
        if let Some(d) = durations.iter().find(|d| **d <= Beats::from_integer(0)) {
            return Err(CodecError::InvalidVocabulary(format!(
                "duration bucket {d} is not positive"
            )));
        }
        if let Some(pair) = durations.windows(2).find(|w| w[0] >= w[1]) {
            return Err(CodecError::InvalidVocabulary(format!(
                "duration buckets out of order: {} then {}",
                pair[0], pair[1]
            )));
        }
        Ok(DurationVocab { durations })
    }

    /// Distinct values from `durations`, ascending.
    pub fn from_durations<I: IntoIterator<Item = Beats>>(durations: I) -> Self {
        let set: BTreeSet<Beats> = durations.into_iter().collect();
        DurationVocab {
            durations: set.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn durations(&self) -> &[Beats] {
        &self.durations
    }

    pub fn index_of(&self, duration: Beats) -> Result<usize> {
        self.durations
            .binary_search(&duration)
            .map_err(|_| CodecError::OutOfVocabulary(format!("duration {duration}")))
    }

    pub fn duration(&self, index: usize) -> Result<Beats> {
        self.durations.get(index).copied().ok_or_else(|| {
            CodecError::OutOfVocabulary(format!(
                "duration index {index} (vocabulary size {})",
                self.len()
            ))
        })
    }
}

mod beats_list {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Item(#[serde(with = "serde_beats")] Beats);

    pub fn serialize<S: Serializer>(values: &[Beats], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|&b| Item(b)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<Beats>, D::Error> {
        let items = Vec::<Item>::deserialize(deserializer)?;
        Ok(items.into_iter().map(|Item(b)| b).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beats::{beats, whole};

    fn range(low: &str, high: &str, holds: bool) -> VocabularyConfig {
        VocabularyConfig {
            low: normalize(low).unwrap(),
            high: normalize(high).unwrap(),
            holds,
        }
    }

    #[test]
    fn test_layout_with_holds() {
        let vocab = Vocabulary::build(&range("C4", "D4", true)).unwrap();
        let names: Vec<String> = vocab.tokens().iter().map(|t| t.to_string()).collect();
        assert_eq!(
            names,
            vec!["<end>", "rest", "C4", "contC4", "D-4", "contD-4", "D4", "contD4"]
        );
    }

    #[test]
    fn test_compact_layout_matches_default_range() {
        // E2..=C5 is 33 semitones: 2 special tokens + 33 onsets.
        let vocab = Vocabulary::build(&range("E2", "C5", false)).unwrap();
        assert_eq!(vocab.len(), 35);
        assert_eq!(vocab.token(2).unwrap().to_string(), "E2");
        assert_eq!(vocab.token(4).unwrap().to_string(), "G-2");
        assert_eq!(vocab.token(34).unwrap().to_string(), "C5");
    }

    #[test]
    fn test_build_is_deterministic() {
        let cfg = VocabularyConfig::default();
        let a = Vocabulary::build(&cfg).unwrap();
        let b = Vocabulary::build(&cfg).unwrap();
        assert_eq!(a.tokens(), b.tokens());
    }

    #[test]
    fn test_empty_range_rejected() {
        assert!(matches!(
            Vocabulary::build(&range("C5", "C4", true)),
            Err(CodecError::EmptyRange { .. })
        ));
    }

    #[test]
    fn test_out_of_vocabulary_never_aliases_boundary() {
        let vocab = Vocabulary::build(&range("C4", "C5", true)).unwrap();
        let low = Token::Onset(normalize("B3").unwrap());
        assert!(matches!(vocab.index_of(&low), Err(CodecError::OutOfVocabulary(_))));
        assert!(matches!(vocab.token(vocab.len()), Err(CodecError::OutOfVocabulary(_))));
    }

    #[test]
    fn test_index_mapping_is_bijective() {
        let vocab = Vocabulary::build(&VocabularyConfig::default()).unwrap();
        for (i, token) in vocab.tokens().iter().enumerate() {
            assert_eq!(vocab.index_of(token).unwrap(), i);
            assert_eq!(vocab.token(i).unwrap(), *token);
        }
    }

    #[test]
    fn test_json_round_trip_and_validation() {
        let vocab = Vocabulary::build(&range("G3", "B3", true)).unwrap();
        let restored = Vocabulary::from_json(&vocab.to_json().unwrap()).unwrap();
        assert_eq!(vocab, restored);

        let swapped = r#"["rest", "<end>", "C4"]"#;
        assert!(matches!(
            Vocabulary::from_json(swapped),
            Err(CodecError::InvalidVocabulary(_))
        ));
        let duplicated = r#"["<end>", "rest", "C#4", "D-4"]"#;
        assert!(matches!(
            Vocabulary::from_json(duplicated),
            Err(CodecError::InvalidVocabulary(_))
        ));
    }

    #[test]
    fn test_duration_vocab_sorted_unique() {
        let vocab = DurationVocab::from_durations([whole(1), beats(1, 4), whole(1), beats(3, 2)]);
        assert_eq!(vocab.durations(), &[beats(1, 4), whole(1), beats(3, 2)]);
        assert_eq!(vocab.index_of(whole(1)).unwrap(), 1);
        assert!(vocab.index_of(beats(1, 8)).is_err());
        assert!(vocab.duration(3).is_err());

        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"{"durations":["1/4","1","3/2"]}"#);
        let restored: DurationVocab = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, vocab);
    }

    #[test]
    fn test_duration_vocab_load_rejects_unsorted_lists() {
        for json in [
            r#"{"durations":["1","1/4"]}"#,
            r#"{"durations":["1/4","1/4","1"]}"#,
            r#"{"durations":["0","1"]}"#,
        ] {
            assert!(
                serde_json::from_str::<DurationVocab>(json).is_err(),
                "{json} should be rejected"
            );
        }
        assert!(matches!(
            DurationVocab::from_sorted(vec![whole(2), whole(1)]),
            Err(CodecError::InvalidVocabulary(_))
        ));
        let vocab = DurationVocab::from_sorted(vec![beats(1, 4), whole(1)]).unwrap();
        assert_eq!(vocab.index_of(whole(1)).unwrap(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let vocab = Vocabulary::build(&range("A3", "C4", true)).unwrap();
        let path = std::env::temp_dir().join(format!("chorale_vocab_{}.json", std::process::id()));
        vocab.save(&path).unwrap();
        let loaded = Vocabulary::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, vocab);
        assert_eq!(loaded.index_of(&Token::Rest).unwrap(), REST_INDEX);
        assert!(matches!(Vocabulary::load(&path), Err(CodecError::Io(_))));
    }
}
