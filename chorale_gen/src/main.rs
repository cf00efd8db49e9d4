// Chorale generator: CLI entry point.
//
// Subcommands:
//   synth    write a random aligned SATB corpus (JSON)
//   markov   build per-voice transition tables from a corpus and sample a piece
//   train    train the multi-voice predictor and save it (safetensors + manifest)
//   predict  continue a corpus piece's opening with a trained predictor
//
// Usage:
//   cargo run -p chorale_gen -- synth --out corpus.json --pieces 16 --seed 7
//   cargo run -p chorale_gen -- markov --corpus corpus.json --out markov.mid
//   cargo run -p chorale_gen -- train --corpus corpus.json --model-dir model
//   cargo run -p chorale_gen -- predict --model-dir model --corpus corpus.json --out nn.mid
//
// Every subcommand accepts `--config FILE` (JSON, see `ChoraleConfig`) and
// `--seed N`. Log verbosity follows RUST_LOG (default `info`).

use anyhow::{Context, bail};
use candle_core::Device;
use chorale_codec::{EncodedPiece, Piece, Vocabulary, beats, decode_piece};
use chorale_gen::config::ChoraleConfig;
use chorale_gen::corpus::Corpus;
use chorale_gen::dataset::{StepSequences, TrainingSet, duration_vocab};
use chorale_gen::markov::MarkovModels;
use chorale_gen::midi::write_midi;
use chorale_gen::predictor::PredictorShape;
use chorale_gen::synthetic::{SynthConfig, random_corpus};
use chorale_gen::train::{ModelManifest, SequenceModel};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "chorale", about = "Quantized chorale tokens, Markov and neural generators")]
struct Cli {
    /// JSON config file; missing fields take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// RNG seed (omit for a random one; training falls back to the config seed)
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a random aligned SATB corpus
    Synth {
        #[arg(long, short = 'o', default_value = "corpus.json")]
        out: PathBuf,
        #[arg(long, default_value_t = 8)]
        pieces: usize,
        /// Piece length in beats, e.g. "16" or "31/2"
        #[arg(long, default_value = "16")]
        length: String,
    },
    /// Sample one piece from per-voice transition tables
    Markov {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long, short = 'o', default_value = "markov.mid")]
        out: PathBuf,
        /// Also save the transition tables as JSON
        #[arg(long)]
        tables: Option<PathBuf>,
        /// Also save the sampled piece as a JSON corpus
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Train the multi-voice predictor
    Train {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long, default_value = "model")]
        model_dir: PathBuf,
        /// Override the configured epoch ceiling
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Continue a corpus piece's opening window with a trained predictor
    Predict {
        #[arg(long, default_value = "model")]
        model_dir: PathBuf,
        #[arg(long)]
        corpus: PathBuf,
        /// Index of the piece whose opening seeds generation
        #[arg(long, default_value_t = 0)]
        piece: usize,
        #[arg(long, short = 'o', default_value = "predicted.mid")]
        out: PathBuf,
        /// Override the configured step ceiling
        #[arg(long)]
        steps: Option<usize>,
        /// Also save the generated piece as a JSON corpus
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ChoraleConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ChoraleConfig::default(),
    };
    let mut rng = match cli.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    };

    println!("=== Chorale Generator ===");
    println!(
        "Step: {} beats, range {}..{}",
        config.quantize.step, config.vocabulary.low, config.vocabulary.high
    );
    if let Some(s) = cli.seed {
        println!("Seed: {}", s);
    }
    println!();

    match cli.command {
        Command::Synth {
            out,
            pieces,
            length,
        } => {
            let length = beats::parse(&length)
                .with_context(|| format!("invalid length '{length}'"))?;
            let synth = SynthConfig {
                pieces,
                length,
                ..Default::default()
            };
            println!("[1/2] Generating {} pieces of {} beats...", pieces, length);
            let corpus = Corpus::new(random_corpus(&synth, &mut rng)?);
            println!("[2/2] Writing {}...", out.display());
            corpus.save(&out)?;
            println!("  Done.");
        }
        Command::Markov {
            corpus,
            out,
            tables,
            json,
        } => {
            let vocab = Vocabulary::build(&config.vocabulary)?;
            println!("[1/4] Loading corpus...");
            let encoded = load_encoded(&corpus, &config)?;

            println!("[2/4] Counting transitions...");
            let models = MarkovModels::from_pieces(&encoded, &vocab)?;
            if let Some(path) = &tables {
                models.save(path)?;
                println!("  Saved tables to {}.", path.display());
            }

            println!("[3/4] Sampling (max {} tokens per voice)...", config.markov.max_length);
            let mut voices = Vec::new();
            for (id, sampled) in models.sample(config.markov.max_length, &mut rng)? {
                if sampled.truncated {
                    println!("  {}: truncated at {} tokens", id, sampled.indices.len());
                }
                voices.push((id, vocab.decode(sampled.body())?));
            }
            let (piece, orphans) = decode_piece(&voices, config.quantize.step);
            if orphans > 0 {
                println!("  Dropped {} orphan continuation tokens.", orphans);
            }
            finish(piece, &out, json.as_deref(), &config)?;
        }
        Command::Train {
            corpus,
            model_dir,
            epochs,
        } => {
            let vocab = Vocabulary::build(&config.vocabulary)?;
            println!("[1/4] Loading corpus...");
            let encoded = load_encoded(&corpus, &config)?;
            let Some(first) = encoded.first() else {
                bail!("no usable pieces in {}", corpus.display());
            };

            println!("[2/4] Building training windows...");
            let durations = duration_vocab(&encoded);
            let sequences = encoded
                .iter()
                .map(|p| StepSequences::from_piece(p, &vocab, &durations))
                .collect::<chorale_gen::Result<Vec<_>>>()?;
            let set = TrainingSet::build(&sequences, config.predictor.window)?;
            println!(
                "  {} examples, {} voices, {} duration buckets",
                set.len(),
                set.voices(),
                durations.len()
            );

            let manifest = ModelManifest {
                shape: PredictorShape {
                    voices: set.voices(),
                    pitch_vocab: vocab.len(),
                    duration_vocab: durations.len(),
                    window: config.predictor.window,
                    embed_dim: config.predictor.embed_dim,
                    hidden_dim: config.predictor.hidden_dim,
                },
                vocabulary: vocab.tokens().to_vec(),
                durations,
                step: config.quantize.step,
                voice_ids: first.voice_ids().iter().map(|s| s.to_string()).collect(),
            };
            let mut model = SequenceModel::new(manifest, &Device::Cpu)?;

            let mut training = config.training.clone();
            if let Some(e) = epochs {
                training.epochs = e;
            }
            if let Some(s) = cli.seed {
                training.seed = s;
            }
            println!("[3/4] Training (up to {} epochs)...", training.epochs);
            let report = model.train(&set, &training, |_| ControlFlow::Continue(()))?;
            for (epoch, loss) in report.epoch_means().iter().enumerate() {
                println!("  Epoch {}: loss {:.4}", epoch + 1, loss);
            }

            println!("[4/4] Saving model to {}...", model_dir.display());
            model.save(&model_dir)?;
            println!("  Done.");
        }
        Command::Predict {
            model_dir,
            corpus,
            piece,
            out,
            steps,
            json,
        } => {
            println!("[1/4] Loading model from {}...", model_dir.display());
            let model = SequenceModel::load(&model_dir, &Device::Cpu)?;
            let manifest = model.manifest().clone();
            let vocab = model.vocabulary()?;

            println!("[2/4] Loading seed piece {}...", piece);
            let mut config = config;
            config.quantize.step = manifest.step;
            let encoded = load_encoded(&corpus, &config)?;
            let Some(seed_piece) = encoded.get(piece) else {
                bail!("corpus has only {} usable pieces", encoded.len());
            };
            let sequences = StepSequences::from_piece(seed_piece, &vocab, &manifest.durations)?
                .arrange(&manifest.voice_ids)
                .context("seed piece voices do not match the model")?;
            let seed = sequences.slice(0, manifest.shape.window);

            let max_steps = steps.unwrap_or(config.predictor.max_steps);
            println!("[3/4] Generating (max {} steps)...", max_steps);
            let generated = model.generate(&seed, max_steps)?;
            if generated.truncated {
                println!("  Truncated at {} steps.", generated.steps.steps());
            }
            let mut all = seed;
            for step in 0..generated.steps.steps() {
                let column = generated.steps.slice(step, 1);
                let pitches: Vec<u32> = column.pitches.iter().flatten().copied().collect();
                let durations: Vec<u32> = column.durations.iter().flatten().copied().collect();
                all.push_step(&pitches, &durations);
            }
            let (piece, orphans) = model.decode(&all)?;
            if orphans > 0 {
                println!("  Dropped {} orphan continuation tokens.", orphans);
            }
            finish(piece, &out, json.as_deref(), &config)?;
        }
    }
    Ok(())
}

/// Load a corpus and encode it, reporting pieces the encoder rejected.
fn load_encoded(path: &Path, config: &ChoraleConfig) -> anyhow::Result<Vec<EncodedPiece>> {
    let corpus =
        Corpus::load(path).with_context(|| format!("loading corpus {}", path.display()))?;
    let (encoded, rejected) = corpus.encode(&config.quantize);
    println!("  {} pieces loaded, {} usable.", corpus.len(), encoded.len());
    for r in &rejected {
        println!(
            "  Skipped piece {} ({}): {}",
            r.index,
            r.title.as_deref().unwrap_or("untitled"),
            r.error
        );
    }
    Ok(encoded)
}

/// Print the piece and write it out.
fn finish(
    piece: Piece,
    out: &Path,
    json: Option<&Path>,
    config: &ChoraleConfig,
) -> anyhow::Result<()> {
    print!("{}", piece.summary());
    for (id, total) in piece.total_durations() {
        println!("  {}: {} beats", id, total);
    }
    println!("[4/4] Writing MIDI to {}...", out.display());
    write_midi(&piece, config.tempo_bpm, out)?;
    if let Some(path) = json {
        Corpus::new(vec![piece]).save(path)?;
        println!("  Saved events to {}.", path.display());
    }
    println!("  Done.");
    println!();
    println!("Play with: timidity {} (or any MIDI player)", out.display());
    Ok(())
}
