// Training, generation and persistence for the multi-voice predictor.
//
// `SequenceModel` owns the predictor's parameters (a candle `VarMap`) along
// with everything needed to turn predictions back into music: the token
// vocabulary, the duration buckets, the time step and the voice ids. That
// metadata is the `ModelManifest`, saved as JSON next to the safetensors
// weights.
//
// Training: every epoch shuffles the example order with a seeded `StdRng`
// and takes one AdamW step per mini-batch on the summed per-voice
// cross-entropy. Each step's loss is logged, recorded in the report and
// handed to an observer, which may return `ControlFlow::Break` to stop
// between steps. The epoch count is a ceiling.
//
// Generation: greedy (argmax) continuation of a seed window. Each step feeds
// the last `window` steps, appends the predicted pitch and duration of every
// voice, and slides. Generation ends early once every voice predicts the
// boundary token; reaching the step ceiling instead flags the result as
// truncated. Decoding keeps the voices in step: a boundary predicted by
// only some voices, or a continuation with nothing to continue, becomes a
// one-step rest in that voice.

use crate::config::TrainingConfig;
use crate::dataset::{StepSequences, TrainingSet};
use crate::error::{Error, Result};
use crate::predictor::{MultiVoicePredictor, PredictorShape};
use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use chorale_codec::beats::serde_beats;
use chorale_codec::{BOUNDARY_INDEX, Beats, DurationVocab, Piece, Token, Vocabulary, decode_piece};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::path::Path;

const WEIGHTS_FILE: &str = "model.safetensors";
const MANIFEST_FILE: &str = "manifest.json";

/// Everything besides the weights needed to rebuild and use a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub shape: PredictorShape,
    pub vocabulary: Vec<Token>,
    pub durations: DurationVocab,
    #[serde(with = "serde_beats")]
    pub step: Beats,
    pub voice_ids: Vec<String>,
}

/// Loss after one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub epoch: usize,
    /// Global step count, starting at 0.
    pub step: usize,
    pub loss: f32,
}

#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub steps: Vec<StepReport>,
    pub epochs_completed: usize,
    /// The observer asked to stop.
    pub stopped_early: bool,
}

impl TrainingReport {
    /// Mean loss of every epoch that ran (the last possibly partial).
    pub fn epoch_means(&self) -> Vec<f32> {
        let epochs = self.steps.last().map_or(0, |s| s.epoch + 1);
        (0..epochs)
            .map(|epoch| {
                let losses: Vec<f32> = self
                    .steps
                    .iter()
                    .filter(|s| s.epoch == epoch)
                    .map(|s| s.loss)
                    .collect();
                losses.iter().sum::<f32>() / losses.len().max(1) as f32
            })
            .collect()
    }
}

/// Continuation produced by `SequenceModel::generate`.
#[derive(Debug, Clone)]
pub struct Generated {
    /// Generated steps only (the seed is not included). Ends with a boundary
    /// step in every voice unless `truncated`.
    pub steps: StepSequences,
    pub truncated: bool,
}

impl Generated {
    /// Strict form: a truncated run becomes `NonTerminatingGeneration`.
    pub fn into_result(self) -> Result<StepSequences> {
        if self.truncated {
            Err(Error::NonTerminatingGeneration {
                generated: self.steps.steps(),
            })
        } else {
            Ok(self.steps)
        }
    }
}

/// Predictor parameters plus their manifest.
pub struct SequenceModel {
    manifest: ModelManifest,
    varmap: VarMap,
    model: MultiVoicePredictor,
    device: Device,
}

impl SequenceModel {
    /// Freshly initialized parameters.
    pub fn new(manifest: ModelManifest, device: &Device) -> Result<Self> {
        if manifest.voice_ids.len() != manifest.shape.voices {
            return Err(Error::VoiceCountMismatch {
                expected: manifest.shape.voices,
                found: manifest.voice_ids.len(),
            });
        }
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = MultiVoicePredictor::new(manifest.shape.clone(), vb)?;
        Ok(Self {
            manifest,
            varmap,
            model,
            device: device.clone(),
        })
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    pub fn vocabulary(&self) -> Result<Vocabulary> {
        Ok(Vocabulary::from_tokens(self.manifest.vocabulary.clone())?)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Run up to `config.epochs` epochs of mini-batch AdamW.
    pub fn train<F>(
        &mut self,
        set: &TrainingSet,
        config: &TrainingConfig,
        mut observer: F,
    ) -> Result<TrainingReport>
    where
        F: FnMut(&StepReport) -> ControlFlow<()>,
    {
        let shape = &self.manifest.shape;
        if set.voices() != shape.voices {
            return Err(Error::VoiceCountMismatch {
                expected: shape.voices,
                found: set.voices(),
            });
        }
        if set.window() != shape.window {
            return Err(Error::Config(format!(
                "training window {} does not match model window {}",
                set.window(),
                shape.window
            )));
        }

        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(self.varmap.all_vars(), params)?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..set.len()).collect();
        let batch_size = config.batch_size.max(1);
        let mut report = TrainingReport::default();

        for epoch in 0..config.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0f32;
            let mut epoch_steps = 0usize;
            for chunk in order.chunks(batch_size) {
                let batch = set.batch(chunk, &self.device)?;
                let loss = self.model.loss(&batch)?;
                optimizer.backward_step(&loss)?;

                let step = StepReport {
                    epoch,
                    step: report.steps.len(),
                    loss: loss.to_scalar::<f32>()?,
                };
                tracing::debug!(epoch, step = step.step, loss = step.loss, "training step");
                report.steps.push(step);
                epoch_loss += step.loss;
                epoch_steps += 1;

                if observer(&step).is_break() {
                    tracing::info!(epoch, step = step.step, "training stopped by observer");
                    report.stopped_early = true;
                    return Ok(report);
                }
            }
            report.epochs_completed = epoch + 1;
            tracing::info!(
                epoch,
                mean_loss = epoch_loss / epoch_steps.max(1) as f32,
                "epoch complete"
            );
        }
        Ok(report)
    }

    /// Greedy continuation of `seed` for at most `max_steps` steps.
    pub fn generate(&self, seed: &StepSequences, max_steps: usize) -> Result<Generated> {
        let shape = &self.manifest.shape;
        if seed.voices() != shape.voices {
            return Err(Error::VoiceCountMismatch {
                expected: shape.voices,
                found: seed.voices(),
            });
        }
        if seed.ids != self.manifest.voice_ids {
            return Err(Error::Config(format!(
                "seed voices {:?} are not in model order {:?}",
                seed.ids, self.manifest.voice_ids
            )));
        }
        let mut context = seed.clone();
        let mut steps = StepSequences::empty(seed.ids.clone());
        for _ in 0..max_steps {
            let (pitch, duration) = context.context_tensors(shape.window, &self.device)?;
            let (pitches, durations) = self.model.predict(&pitch, &duration)?;
            let (next_pitch, next_duration) = match (pitches.first(), durations.first()) {
                (Some(p), Some(d)) => (p, d),
                _ => return Err(Error::Config("predictor returned an empty batch".into())),
            };
            context.push_step(next_pitch, next_duration);
            steps.push_step(next_pitch, next_duration);
            if next_pitch.iter().all(|&p| p == BOUNDARY_INDEX as u32) {
                return Ok(Generated {
                    steps,
                    truncated: false,
                });
            }
        }
        tracing::debug!(max_steps, "generation reached its step ceiling");
        Ok(Generated {
            steps,
            truncated: true,
        })
    }

    /// Decode generated steps into a piece, keeping every voice the same
    /// length. Returns the piece and the number of orphan continuations,
    /// which are decoded as rests.
    pub fn decode(&self, steps: &StepSequences) -> Result<(Piece, usize)> {
        let vocab = self.vocabulary()?;
        let mut voices = steps.tokens(&vocab)?;
        let orphans = settle_generated(&mut voices);
        let (piece, dropped) = decode_piece(&voices, self.manifest.step);
        Ok((piece, orphans + dropped))
    }

    /// Write `model.safetensors` and `manifest.json` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        std::fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&self.manifest)?,
        )?;
        Ok(())
    }

    pub fn load(dir: &Path, device: &Device) -> Result<Self> {
        let data = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let manifest: ModelManifest = serde_json::from_str(&data)?;
        let mut model = Self::new(manifest, device)?;
        model.varmap.load(dir.join(WEIGHTS_FILE))?;
        tracing::info!(dir = %dir.display(), "loaded sequence model");
        Ok(model)
    }
}

/// Rewrite generated token columns so that every position is one step of
/// time in every voice.
///
/// A boundary only ends the piece when all voices predict it at the same
/// step; a voice that predicts it alone rests through that step instead. A
/// continuation with no matching open event also becomes a rest. Returns the
/// number of such orphans.
fn settle_generated(voices: &mut [(String, Vec<Token>)]) -> usize {
    let steps = voices.iter().map(|(_, t)| t.len()).max().unwrap_or(0);
    for step in 0..steps {
        let piece_ends = voices
            .iter()
            .all(|(_, t)| t.get(step) == Some(&Token::Boundary));
        if piece_ends {
            continue;
        }
        for (_, tokens) in voices.iter_mut() {
            if let Some(token) = tokens.get_mut(step).filter(|t| **t == Token::Boundary) {
                *token = Token::Rest;
            }
        }
    }

    let mut orphans = 0;
    for (id, tokens) in voices.iter_mut() {
        let mut open = None;
        for (position, token) in tokens.iter_mut().enumerate() {
            match *token {
                Token::Onset(p) => open = Some(p),
                Token::Hold(p) if open == Some(p) => {}
                Token::Hold(_) => {
                    tracing::debug!(voice = %id, position, "orphan continuation decoded as rest");
                    *token = Token::Rest;
                    orphans += 1;
                    open = None;
                }
                _ => open = None,
            }
        }
    }
    orphans
}
