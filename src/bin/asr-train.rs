//! Train the speech Transformer on an LJSpeech-style dataset.
//!
//! Expects `<data-dir>/metadata.csv` and `<data-dir>/wavs/*.wav`. After every
//! epoch the current weights are written to
//! `<output-dir>/model.safetensors` next to `<output-dir>/config.json`, which
//! `asr-transcribe` reads back.

use std::path::PathBuf;

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use speech_transformer_rs::{
    config::AsrConfig,
    data::{BatchLoader, collect_examples, load_metadata, split},
    display::DisplayOutputs,
    text::Vectorizer,
    train::Trainer,
};

#[derive(Parser, Debug)]
#[command(name = "asr-train", about = "Train a character-level speech Transformer")]
struct Args {
    /// Dataset root holding metadata.csv and wavs/.
    #[arg(long)]
    data_dir: PathBuf,

    /// Where the checkpoint and config are written.
    #[arg(long, short = 'o', default_value = "checkpoints")]
    output_dir: PathBuf,

    /// JSON config; fields left out keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Shuffle seed. Omit for a random seed each run.
    #[arg(long, short = 's')]
    seed: Option<u64>,

    /// Log sample transcriptions every this many epochs.
    #[arg(long)]
    display_every: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AsrConfig::from_json_file(path)?,
        None => AsrConfig::default(),
    };
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(every) = args.display_every {
        config.training.display_every = every;
    }
    if args.seed.is_some() {
        config.training.seed = args.seed;
    }

    let metadata = load_metadata(args.data_dir.join("metadata.csv"))?;
    let examples = collect_examples(
        args.data_dir.join("wavs"),
        &metadata,
        config.training.max_target_len,
    )?;
    let (train_examples, val_examples) = split(&examples, config.training.train_fraction);
    if train_examples.is_empty() || val_examples.is_empty() {
        anyhow::bail!(
            "need both training and validation examples, got {} and {}",
            train_examples.len(),
            val_examples.len()
        );
    }

    let device = candle_core::Device::cuda_if_available(0)?;
    tracing::info!("Using device: {:?}", device);

    let mut train_loader =
        BatchLoader::new(train_examples, config.training.batch_size, &config, &device)?;
    let val_loader =
        BatchLoader::new(val_examples, config.training.val_batch_size, &config, &device)?;
    config.schedule.steps_per_epoch = train_loader.num_batches() as u64;
    config.validate()?;

    std::fs::create_dir_all(&args.output_dir)?;
    config.to_json_file(args.output_dir.join("config.json"))?;
    let weights_path = args.output_dir.join("model.safetensors");

    let seed = config.training.seed.unwrap_or_else(rand::random);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    tracing::info!(
        seed,
        train = train_loader.num_examples(),
        val = val_loader.num_examples(),
        epochs = config.training.epochs,
        "starting training"
    );

    let mut trainer = Trainer::new(&config, &device)?;
    let display = DisplayOutputs::new(
        Vectorizer::new(config.model.target_maxlen),
        config.training.display_every,
    );

    for epoch in 0..config.training.epochs {
        trainer.reset_metrics();
        train_loader.shuffle(&mut rng);

        let mut loss = 0.0;
        for batch in train_loader.iter() {
            loss = trainer.train_step(&batch?)?;
        }
        let mut val_loss = 0.0;
        for batch in val_loader.iter() {
            val_loss = trainer.eval_step(&batch?)?;
        }
        tracing::info!(
            epoch,
            loss,
            val_loss,
            lr = trainer.learning_rate(),
            "epoch complete"
        );

        if display.is_due(epoch) {
            let batch = val_loader.batch(0)?;
            display.on_epoch_end(epoch, trainer.model(), &batch)?;
        }
        trainer.save(&weights_path)?;
    }

    tracing::info!(path = %weights_path.display(), "saved checkpoint");
    Ok(())
}
