// Multi-voice next-step predictor.
//
// `MultiVoicePredictor` reads a window of steps for every voice and predicts
// the next pitch token and duration bucket of each voice:
// - Per-voice pitch and duration embeddings (shared tables across voices)
// - Embeddings of all voices concatenated per time step
// - One LSTM over the window
// - Final hidden state projected into `voices` categorical distributions
//   over pitches and `voices` over durations
//
// Tensor shapes (`B` batch, `V` voices, `W` window):
// - inputs: `pitch`, `duration` are `u32` `[B, V, W]`
// - outputs: pitch logits `[B, V, pitch_vocab]`, duration logits
//   `[B, V, duration_vocab]`

use candle_core::{D, Result, Tensor};
use candle_nn::{
    Embedding, LSTM, LSTMConfig, Linear, Module, RNN, VarBuilder, embedding, linear, loss, lstm,
};
use serde::{Deserialize, Serialize};

use crate::dataset::Batch;

/// Dimensions of a predictor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorShape {
    pub voices: usize,
    pub pitch_vocab: usize,
    pub duration_vocab: usize,
    pub window: usize,
    pub embed_dim: usize,
    pub hidden_dim: usize,
}

impl PredictorShape {
    /// Width of one LSTM input step: pitch + duration embedding per voice.
    pub fn input_dim(&self) -> usize {
        self.voices * 2 * self.embed_dim
    }
}

/// Embeddings, recurrent core and output heads.
#[derive(Debug, Clone)]
pub struct MultiVoicePredictor {
    shape: PredictorShape,
    pitch_embed: Embedding,
    duration_embed: Embedding,
    lstm: LSTM,
    pitch_head: Linear,
    duration_head: Linear,
}

impl MultiVoicePredictor {
    pub fn new(shape: PredictorShape, vb: VarBuilder) -> Result<Self> {
        let pitch_embed = embedding(shape.pitch_vocab, shape.embed_dim, vb.pp("pitch_embed"))?;
        let duration_embed =
            embedding(shape.duration_vocab, shape.embed_dim, vb.pp("duration_embed"))?;
        let lstm = lstm(
            shape.input_dim(),
            shape.hidden_dim,
            LSTMConfig::default(),
            vb.pp("lstm"),
        )?;
        let pitch_head = linear(
            shape.hidden_dim,
            shape.voices * shape.pitch_vocab,
            vb.pp("pitch_head"),
        )?;
        let duration_head = linear(
            shape.hidden_dim,
            shape.voices * shape.duration_vocab,
            vb.pp("duration_head"),
        )?;
        Ok(Self {
            shape,
            pitch_embed,
            duration_embed,
            lstm,
            pitch_head,
            duration_head,
        })
    }

    pub fn shape(&self) -> &PredictorShape {
        &self.shape
    }

    /// Logits for the step after the window.
    pub fn forward(&self, pitch: &Tensor, duration: &Tensor) -> Result<(Tensor, Tensor)> {
        let (b, v, w) = pitch.dims3()?;
        if v != self.shape.voices {
            candle_core::bail!("expected {} voices, got {v}", self.shape.voices);
        }
        if duration.dims() != pitch.dims() {
            candle_core::bail!(
                "pitch {:?} and duration {:?} inputs differ in shape",
                pitch.dims(),
                duration.dims()
            );
        }

        // [B, V, W, E] each -> [B, V, W, 2E]
        let p = self.pitch_embed.forward(pitch)?;
        let d = self.duration_embed.forward(duration)?;
        let x = Tensor::cat(&[&p, &d], D::Minus1)?;

        // [B, W, V * 2E]: all voices side by side at each step
        let x = x
            .permute((0, 2, 1, 3))?
            .contiguous()?
            .reshape((b, w, self.shape.input_dim()))?;

        let states = self.lstm.seq(&x)?;
        let last = match states.last() {
            Some(state) => state.h().clone(),
            None => candle_core::bail!("empty input window"),
        };

        let pitch_logits = self
            .pitch_head
            .forward(&last)?
            .reshape((b, v, self.shape.pitch_vocab))?;
        let duration_logits = self
            .duration_head
            .forward(&last)?
            .reshape((b, v, self.shape.duration_vocab))?;
        Ok((pitch_logits, duration_logits))
    }

    /// Sum over voices of pitch and duration cross-entropy, averaged over
    /// the batch.
    pub fn loss(&self, batch: &Batch) -> Result<Tensor> {
        let (pitch_logits, duration_logits) = self.forward(&batch.pitch, &batch.duration)?;
        let (b, v, _) = pitch_logits.dims3()?;
        let pitch_loss = loss::cross_entropy(
            &pitch_logits.reshape((b * v, self.shape.pitch_vocab))?,
            &batch.target_pitch.flatten_all()?,
        )?;
        let duration_loss = loss::cross_entropy(
            &duration_logits.reshape((b * v, self.shape.duration_vocab))?,
            &batch.target_duration.flatten_all()?,
        )?;
        // Each term is the mean over B * V rows; scale by V for the per-voice sum.
        (pitch_loss + duration_loss)?.affine(v as f64, 0.0)
    }

    /// Most likely pitch index and duration bucket per voice, `[B][V]`.
    pub fn predict(&self, pitch: &Tensor, duration: &Tensor) -> Result<(Vec<Vec<u32>>, Vec<Vec<u32>>)> {
        let (pitch_logits, duration_logits) = self.forward(pitch, duration)?;
        let pitches = pitch_logits.argmax(D::Minus1)?.to_vec2::<u32>()?;
        let durations = duration_logits.argmax(D::Minus1)?.to_vec2::<u32>()?;
        Ok((pitches, durations))
    }
}
