//! Transcribe WAV files with a trained checkpoint.
//!
//! # Output
//!
//! One JSON line per input file on stdout:
//!
//! ```json
//! {"path":"LJ001-0001.wav","text":"printing, in the only sense"}
//! ```

use std::path::PathBuf;

use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use clap::Parser;
use speech_transformer_rs::{
    audio::{SpectrogramExtractor, read_wav_mono},
    config::AsrConfig,
    model::SpeechTransformer,
    text::{END_INDEX, PAD_INDEX, START_INDEX, Vectorizer},
};

#[derive(Parser, Debug)]
#[command(name = "asr-transcribe", about = "Greedy speech-to-text decoding")]
struct Args {
    /// Directory written by asr-train (config.json + model.safetensors).
    #[arg(long, short = 'm')]
    model_dir: PathBuf,

    /// WAV files to transcribe.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Decode the full target length instead of stopping at the end token.
    #[arg(long)]
    no_early_stop: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AsrConfig::from_json_file(args.model_dir.join("config.json"))?;

    let device = candle_core::Device::cuda_if_available(0)?;
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = SpeechTransformer::new(&config.model, vb)?;
    varmap.load(args.model_dir.join("model.safetensors"))?;
    tracing::info!(dir = %args.model_dir.display(), "loaded checkpoint");

    let extractor = SpectrogramExtractor::new(config.features.clone())?;
    let vectorizer = Vectorizer::new(config.model.target_maxlen);

    for path in &args.inputs {
        let (samples, sample_rate) = read_wav_mono(path)?;
        tracing::debug!(path = %path.display(), sample_rate, samples = samples.len(), "read audio");

        let source = extractor.extract(&samples).to_tensor(&device)?.unsqueeze(0)?;
        let tokens = if args.no_early_stop {
            model.generate(&source, START_INDEX)?
        } else {
            model.generate_with_early_stop(&source, START_INDEX, END_INDEX, PAD_INDEX)?
        };
        let tokens = tokens.squeeze(0)?.to_vec1::<u32>()?;
        let end = tokens
            .iter()
            .position(|&t| t == END_INDEX)
            .unwrap_or(tokens.len());
        let text = vectorizer.decode_transcript(&tokens[..end]);

        let line = serde_json::json!({
            "path": path.display().to_string(),
            "text": text,
        });
        println!("{line}");
    }
    Ok(())
}
