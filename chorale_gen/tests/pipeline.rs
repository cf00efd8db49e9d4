// End-to-end pipeline: synthetic corpus -> codec -> both generators -> MIDI.

use candle_core::Device;
use chorale_codec::beats::whole;
use chorale_codec::{QuantizeConfig, Vocabulary, VocabularyConfig, decode_piece};
use chorale_gen::config::{ChoraleConfig, TrainingConfig};
use chorale_gen::corpus::Corpus;
use chorale_gen::dataset::{StepSequences, TrainingSet, duration_vocab};
use chorale_gen::markov::MarkovModels;
use chorale_gen::midi::piece_to_smf;
use chorale_gen::predictor::PredictorShape;
use chorale_gen::synthetic::{SynthConfig, random_corpus};
use chorale_gen::train::{ModelManifest, SequenceModel};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::ops::ControlFlow;

fn synthetic_corpus(seed: u64) -> Corpus {
    let config = SynthConfig {
        pieces: 3,
        length: whole(6),
        ..Default::default()
    };
    Corpus::new(random_corpus(&config, &mut StdRng::seed_from_u64(seed)).unwrap())
}

#[test]
fn markov_pipeline_produces_playable_piece() {
    let config = ChoraleConfig::default();
    let vocab = Vocabulary::build(&config.vocabulary).unwrap();
    let corpus = Corpus::from_json(&synthetic_corpus(3).to_json().unwrap()).unwrap();
    let (encoded, rejected) = corpus.encode(&config.quantize);
    assert!(rejected.is_empty());
    assert_eq!(encoded.len(), 3);

    let models = MarkovModels::from_pieces(&encoded, &vocab).unwrap();
    assert_eq!(models.voices.len(), 4);

    let mut rng = StdRng::seed_from_u64(10);
    let mut voices = Vec::new();
    for (id, sampled) in models.sample(config.markov.max_length, &mut rng).unwrap() {
        assert!(sampled.indices.len() <= config.markov.max_length);
        assert!(sampled.indices.iter().all(|&i| i < vocab.len()));
        voices.push((id, vocab.decode(sampled.body()).unwrap()));
    }
    let (piece, _orphans) = decode_piece(&voices, config.quantize.step);
    assert_eq!(piece.voice_ids(), vec!["Soprano", "Alto", "Tenor", "Bass"]);

    let smf = piece_to_smf(&piece, config.tempo_bpm);
    assert_eq!(smf.tracks.len(), 5);
}

#[test]
fn predictor_pipeline_trains_generates_and_decodes() {
    let vocab = Vocabulary::build(&VocabularyConfig::default()).unwrap();
    let corpus = synthetic_corpus(8);
    let (encoded, _) = corpus.encode(&QuantizeConfig::default());
    let durations = duration_vocab(&encoded);
    let sequences: Vec<StepSequences> = encoded
        .iter()
        .map(|p| StepSequences::from_piece(p, &vocab, &durations).unwrap())
        .collect();
    let window = 8;
    let set = TrainingSet::build(&sequences, window).unwrap();
    // 6 beats at 1/4 = 24 steps, plus the boundary: 25 - 8 windows per piece.
    assert_eq!(set.len(), 3 * 17);

    let manifest = ModelManifest {
        shape: PredictorShape {
            voices: 4,
            pitch_vocab: vocab.len(),
            duration_vocab: durations.len(),
            window,
            embed_dim: 8,
            hidden_dim: 24,
        },
        vocabulary: vocab.tokens().to_vec(),
        durations,
        step: encoded[0].step,
        voice_ids: encoded[0].voice_ids().iter().map(|s| s.to_string()).collect(),
    };
    let mut model = SequenceModel::new(manifest, &Device::Cpu).unwrap();
    let training = TrainingConfig {
        epochs: 3,
        batch_size: 16,
        learning_rate: 0.005,
        seed: 1,
    };
    let mut losses = Vec::new();
    let report = model
        .train(&set, &training, |step| {
            losses.push(step.loss);
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(report.epochs_completed, 3);
    // ceil(51 / 16) = 4 steps per epoch.
    assert_eq!(losses.len(), 12);
    assert!(losses.iter().all(|l| l.is_finite()));

    let seed = sequences[0].slice(0, window);
    let generated = model.generate(&seed, 20).unwrap();
    assert!(generated.steps.steps() <= 20);
    assert_eq!(generated.truncated, !generated.steps.ends_with_boundary());

    let (piece, _orphans) = model.decode(&generated.steps).unwrap();
    assert_eq!(piece.voices.len(), 4);
    for (_, total) in piece.total_durations() {
        assert!(total <= whole(5));
    }
}
