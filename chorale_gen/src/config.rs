// Data-driven generator configuration.
//
// Every tunable parameter of the pipeline lives in `ChoraleConfig`, loaded
// from JSON. Each section is `#[serde(default)]`, so a config file only needs
// to name the values it changes; `{}` is a valid config. Defaults reproduce
// the reference hyperparameters: a quarter-beat grid over E2..C5, windows of
// 8 steps, 32-wide embeddings, a 128-wide LSTM, learning rate 0.001 and a
// ceiling of 20 epochs.
//
// See also: `chorale_codec::vocab::VocabularyConfig` and
// `chorale_codec::quantize::QuantizeConfig`, which are embedded unchanged.

use crate::error::{Error, Result};
use chorale_codec::{Beats, QuantizeConfig, VocabularyConfig};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Transition-count sampler settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkovConfig {
    /// Maximum number of sampled tokens per voice, terminal token included.
    pub max_length: usize,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        MarkovConfig { max_length: 256 }
    }
}

/// Multi-voice predictor architecture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Context window width, in time steps.
    pub window: usize,
    /// Embedding width for both pitch and duration inputs.
    pub embed_dim: usize,
    /// LSTM hidden state width.
    pub hidden_dim: usize,
    /// Generation step ceiling.
    pub max_steps: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        PredictorConfig {
            window: 8,
            embed_dim: 32,
            hidden_dim: 128,
            max_steps: 64,
        }
    }
}

/// Optimizer and schedule.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Epoch ceiling. Training may stop earlier through the step observer.
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seed for mini-batch shuffling.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 20,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoraleConfig {
    pub vocabulary: VocabularyConfig,
    pub quantize: QuantizeConfig,
    pub markov: MarkovConfig,
    pub predictor: PredictorConfig,
    pub training: TrainingConfig,
    /// Playback tempo for MIDI output.
    pub tempo_bpm: u16,
}

impl Default for ChoraleConfig {
    fn default() -> Self {
        ChoraleConfig {
            vocabulary: VocabularyConfig::default(),
            quantize: QuantizeConfig::default(),
            markov: MarkovConfig::default(),
            predictor: PredictorConfig::default(),
            training: TrainingConfig::default(),
            tempo_bpm: 72,
        }
    }
}

impl ChoraleConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ChoraleConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Reject values no pipeline stage can run with.
    pub fn validate(&self) -> Result<()> {
        if self.quantize.step <= Beats::zero() {
            return Err(Error::Config(format!(
                "quantize.step must be positive, got {}",
                self.quantize.step
            )));
        }
        if self.vocabulary.low > self.vocabulary.high {
            return Err(Error::Config(format!(
                "vocabulary range {}..{} is empty",
                self.vocabulary.low, self.vocabulary.high
            )));
        }
        if self.predictor.window == 0 {
            return Err(Error::Config("predictor.window must be at least 1".into()));
        }
        if self.predictor.embed_dim == 0 || self.predictor.hidden_dim == 0 {
            return Err(Error::Config("predictor dimensions must be non-zero".into()));
        }
        if self.training.batch_size == 0 {
            return Err(Error::Config("training.batch_size must be at least 1".into()));
        }
        let lr = self.training.learning_rate;
        if lr.is_nan() || lr <= 0.0 {
            return Err(Error::Config(format!(
                "training.learning_rate must be positive, got {lr}"
            )));
        }
        if self.tempo_bpm == 0 {
            return Err(Error::Config("tempo_bpm must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorale_codec::beats::beats;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = ChoraleConfig::from_json("{}").unwrap();
        assert_eq!(config.quantize.step, beats(1, 4));
        assert!(config.quantize.reject_coarse);
        assert_eq!(config.vocabulary.low.to_string(), "E2");
        assert_eq!(config.vocabulary.high.to_string(), "C5");
        assert_eq!(config.predictor, PredictorConfig::default());
        assert_eq!(config.training.epochs, 20);
        assert!((config.training.learning_rate - 0.001).abs() < 1e-12);
        assert_eq!(config.tempo_bpm, 72);
    }

    #[test]
    fn test_partial_sections_override() {
        let json = r#"{
            "quantize": {"step": "1/8"},
            "vocabulary": {"low": "C3", "high": "C4"},
            "predictor": {"window": 4},
            "training": {"epochs": 3}
        }"#;
        let config = ChoraleConfig::from_json(json).unwrap();
        assert_eq!(config.quantize.step, beats(1, 8));
        assert_eq!(config.vocabulary.low.to_string(), "C3");
        assert!(config.vocabulary.holds);
        assert_eq!(config.predictor.window, 4);
        assert_eq!(config.predictor.hidden_dim, 128);
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.batch_size, 32);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for json in [
            r#"{"quantize": {"step": "0"}}"#,
            r#"{"vocabulary": {"low": "C5", "high": "C4"}}"#,
            r#"{"predictor": {"window": 0}}"#,
            r#"{"training": {"learning_rate": 0.0}}"#,
            r#"{"tempo_bpm": 0}"#,
        ] {
            assert!(
                matches!(ChoraleConfig::from_json(json), Err(Error::Config(_))),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let config = ChoraleConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored = ChoraleConfig::from_json(&json).unwrap();
        assert_eq!(restored.quantize.step, config.quantize.step);
        assert_eq!(restored.predictor, config.predictor);
    }
}
