// Chorale generators
//
// Generative models over the token space of `chorale_codec`: a per-voice
// transition-count (bigram) sampler and a neural multi-voice next-step
// predictor, plus the plumbing to feed them a corpus and play back what they
// produce.
//
// Architecture:
// - config.rs: `ChoraleConfig` (vocabulary, quantization, sampler, predictor,
//   training, tempo), loaded from JSON with per-section defaults
// - corpus.rs: JSON corpus of pieces; encodes pieces, skipping rejected ones
// - markov.rs: dense transition-count tables, bounded sampling, per-voice sets
// - dataset.rs: per-voice pitch/duration-bucket step sequences, stride-1
//   windows, tensor batches
// - predictor.rs: candle model (embeddings -> LSTM -> per-voice heads)
// - train.rs: AdamW training loop with step observer, greedy generation,
//   safetensors + manifest persistence
// - synthetic.rs: random aligned SATB corpora for smoke tests and demos
// - midi.rs: MIDI renderer implementing `chorale_codec::EventSink`
// - error.rs: crate error type
//
// All randomness flows through caller-supplied RNGs, so every stage is
// reproducible given a seed.

pub mod config;
pub mod corpus;
pub mod dataset;
pub mod error;
pub mod markov;
pub mod midi;
pub mod predictor;
pub mod synthetic;
pub mod train;

pub use error::{Error, Result};
