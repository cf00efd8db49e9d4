// Step-sequence dataset for the multi-voice predictor.
//
// Each aligned piece becomes two parallel integer sequences per voice: the
// vocabulary index of the token at every time step, and the duration bucket
// of that step. A step's bucket is the quantized length of the event it
// belongs to (an onset and its continuations share one bucket), looked up in
// a `DurationVocab` collected from the whole corpus. Every voice is closed
// with one boundary step so the predictor sees where pieces end.
//
// Training examples are windows of `window` consecutive steps with stride 1,
// taken per piece (never spanning two pieces); the target is the step right
// after the window. A piece of T steps yields T - window examples. Every
// example carries all voices, so all pieces must have the same voice count.
//
// Batches are flattened voice-major into `u32` tensors:
//   pitch, duration:                  (batch, voices, window)
//   target_pitch, target_duration:    (batch, voices)

use crate::error::{Error, Result};
use candle_core::{Device, Tensor};
use chorale_codec::{
    BOUNDARY_INDEX, DurationVocab, EncodedPiece, Token, Vocabulary, check_alignment,
    step_spans,
};

/// A voice's tokens closed with a trailing boundary.
fn framed(tokens: &[Token]) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len() + 1);
    out.extend_from_slice(tokens);
    out.push(Token::Boundary);
    out
}

/// Collect every duration bucket the corpus uses.
pub fn duration_vocab(pieces: &[EncodedPiece]) -> DurationVocab {
    DurationVocab::from_durations(pieces.iter().flat_map(|piece| {
        piece
            .voices
            .iter()
            .flat_map(move |v| step_spans(&framed(&v.tokens), piece.step))
    }))
}

/// Per-voice pitch-index and duration-bucket sequences of equal length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSequences {
    pub ids: Vec<String>,
    pub pitches: Vec<Vec<u32>>,
    pub durations: Vec<Vec<u32>>,
}

impl StepSequences {
    /// Convert one encoded piece, appending the closing boundary step.
    pub fn from_piece(
        piece: &EncodedPiece,
        vocab: &Vocabulary,
        durations: &DurationVocab,
    ) -> Result<Self> {
        check_alignment(piece.voices.iter().map(|v| (v.id.as_str(), v.len())))?;
        let mut seqs = StepSequences {
            ids: Vec::with_capacity(piece.voices.len()),
            pitches: Vec::with_capacity(piece.voices.len()),
            durations: Vec::with_capacity(piece.voices.len()),
        };
        for voice in &piece.voices {
            let tokens = framed(&voice.tokens);
            let pitches = vocab
                .encode(&tokens)?
                .into_iter()
                .map(|i| i as u32)
                .collect();
            let buckets = step_spans(&tokens, piece.step)
                .into_iter()
                .map(|span| durations.index_of(span).map(|i| i as u32))
                .collect::<chorale_codec::Result<Vec<_>>>()?;
            seqs.ids.push(voice.id.clone());
            seqs.pitches.push(pitches);
            seqs.durations.push(buckets);
        }
        Ok(seqs)
    }

    /// Empty sequences for the given voices.
    pub fn empty(ids: Vec<String>) -> Self {
        let n = ids.len();
        StepSequences {
            ids,
            pitches: vec![Vec::new(); n],
            durations: vec![Vec::new(); n],
        }
    }

    pub fn voices(&self) -> usize {
        self.ids.len()
    }

    pub fn steps(&self) -> usize {
        self.pitches.first().map_or(0, Vec::len)
    }

    /// Steps `start..start + len` of every voice.
    pub fn slice(&self, start: usize, len: usize) -> StepSequences {
        let end = (start + len).min(self.steps());
        let start = start.min(end);
        StepSequences {
            ids: self.ids.clone(),
            pitches: self.pitches.iter().map(|p| p[start..end].to_vec()).collect(),
            durations: self.durations.iter().map(|d| d[start..end].to_vec()).collect(),
        }
    }

    /// Append one step: a pitch index and duration bucket per voice.
    pub fn push_step(&mut self, pitches: &[u32], durations: &[u32]) {
        for (seq, &p) in self.pitches.iter_mut().zip(pitches) {
            seq.push(p);
        }
        for (seq, &d) in self.durations.iter_mut().zip(durations) {
            seq.push(d);
        }
    }

    /// The same voices in the order of `ids`, matched by id.
    pub fn arrange(&self, ids: &[String]) -> Result<StepSequences> {
        if ids.len() != self.voices() {
            return Err(Error::VoiceCountMismatch {
                expected: ids.len(),
                found: self.voices(),
            });
        }
        let mut out = StepSequences::empty(Vec::new());
        for id in ids {
            let Some(i) = self.ids.iter().position(|own| own == id) else {
                return Err(Error::Config(format!(
                    "voice '{id}' not found among {:?}",
                    self.ids
                )));
            };
            out.ids.push(id.clone());
            out.pitches.push(self.pitches[i].clone());
            out.durations.push(self.durations[i].clone());
        }
        Ok(out)
    }

    /// True when every voice's last step is the boundary.
    pub fn ends_with_boundary(&self) -> bool {
        !self.pitches.is_empty()
            && self
                .pitches
                .iter()
                .all(|p| p.last() == Some(&(BOUNDARY_INDEX as u32)))
    }

    /// Map pitch indices back to token sequences, per voice.
    pub fn tokens(&self, vocab: &Vocabulary) -> Result<Vec<(String, Vec<Token>)>> {
        self.ids
            .iter()
            .zip(&self.pitches)
            .map(|(id, pitches)| {
                let indices: Vec<usize> = pitches.iter().map(|&p| p as usize).collect();
                Ok((id.clone(), vocab.decode(&indices)?))
            })
            .collect()
    }

    /// Flatten the last `window` steps into `(1, voices, window)` tensors.
    pub fn context_tensors(&self, window: usize, device: &Device) -> Result<(Tensor, Tensor)> {
        let steps = self.steps();
        if steps < window {
            return Err(Error::Config(format!(
                "context has {steps} steps, the predictor needs {window}"
            )));
        }
        let tail = self.slice(steps - window, window);
        let shape = (1, self.voices(), window);
        let pitch = Tensor::from_vec(tail.pitches.concat(), shape, device)?;
        let duration = Tensor::from_vec(tail.durations.concat(), shape, device)?;
        Ok((pitch, duration))
    }
}

/// One windowed example, flattened voice-major.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Example {
    pitch: Vec<u32>,
    duration: Vec<u32>,
    target_pitch: Vec<u32>,
    target_duration: Vec<u32>,
}

/// A mini-batch ready for the predictor.
#[derive(Debug, Clone)]
pub struct Batch {
    pub pitch: Tensor,
    pub duration: Tensor,
    pub target_pitch: Tensor,
    pub target_duration: Tensor,
}

/// All windowed examples of a corpus.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    window: usize,
    voices: usize,
    examples: Vec<Example>,
}

impl TrainingSet {
    pub fn build(pieces: &[StepSequences], window: usize) -> Result<Self> {
        let voices = pieces.first().map_or(0, StepSequences::voices);
        let mut examples = Vec::new();
        for piece in pieces {
            if piece.voices() != voices {
                return Err(Error::VoiceCountMismatch {
                    expected: voices,
                    found: piece.voices(),
                });
            }
            let ids = piece.ids.iter().map(String::as_str);
            let lengths = ids
                .clone()
                .zip(piece.pitches.iter().map(Vec::len))
                .chain(ids.zip(piece.durations.iter().map(Vec::len)));
            let steps = check_alignment(lengths)?;
            for start in 0..steps.saturating_sub(window) {
                let target = start + window;
                examples.push(Example {
                    pitch: piece.pitches.iter().flat_map(|p| &p[start..target]).copied().collect(),
                    duration: piece.durations.iter().flat_map(|d| &d[start..target]).copied().collect(),
                    target_pitch: piece.pitches.iter().map(|p| p[target]).collect(),
                    target_duration: piece.durations.iter().map(|d| d[target]).collect(),
                });
            }
        }
        if examples.is_empty() {
            return Err(Error::EmptyTrainingSet { window });
        }
        tracing::info!(examples = examples.len(), voices, window, "built training set");
        Ok(TrainingSet {
            window,
            voices,
            examples,
        })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn voices(&self) -> usize {
        self.voices
    }

    /// Stack the selected examples into tensors.
    pub fn batch(&self, indices: &[usize], device: &Device) -> Result<Batch> {
        let n = indices.len();
        let mut pitch = Vec::with_capacity(n * self.voices * self.window);
        let mut duration = Vec::with_capacity(n * self.voices * self.window);
        let mut target_pitch = Vec::with_capacity(n * self.voices);
        let mut target_duration = Vec::with_capacity(n * self.voices);
        for &i in indices {
            let example = &self.examples[i];
            pitch.extend_from_slice(&example.pitch);
            duration.extend_from_slice(&example.duration);
            target_pitch.extend_from_slice(&example.target_pitch);
            target_duration.extend_from_slice(&example.target_duration);
        }
        let inputs = (n, self.voices, self.window);
        let targets = (n, self.voices);
        Ok(Batch {
            pitch: Tensor::from_vec(pitch, inputs, device)?,
            duration: Tensor::from_vec(duration, inputs, device)?,
            target_pitch: Tensor::from_vec(target_pitch, targets, device)?,
            target_duration: Tensor::from_vec(target_duration, targets, device)?,
        })
    }
}
