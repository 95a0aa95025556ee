//! Dataset discovery and batching.
//!
//! Expects the LJSpeech layout: a `metadata.csv` of `id|raw|normalized`
//! lines and a directory of `<id>.wav` files. Examples are paired by file
//! stem, filtered by transcript length, and turned into fixed-shape
//! [`Batch`]es on demand.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::audio::{SpectrogramExtractor, read_wav_mono};
use crate::config::AsrConfig;
use crate::text::Vectorizer;
use crate::{Error, Result};

/// One audio file and its transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub audio_path: PathBuf,
    pub transcript: String,
}

/// Parse `metadata.csv` into an id → normalized transcript map.
pub fn load_metadata(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    parse_metadata(&text).map_err(|e| match e {
        Error::Dataset(msg) => Error::Dataset(format!("{}: {msg}", path.display())),
        other => other,
    })
}

fn parse_metadata(text: &str) -> Result<HashMap<String, String>> {
    let mut id_to_text = HashMap::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 3 {
            return Err(Error::Dataset(format!(
                "line {}: expected 3 '|'-separated fields, found {}",
                line_no + 1,
                fields.len()
            )));
        }
        id_to_text.insert(fields[0].to_string(), fields[2].to_string());
    }
    Ok(id_to_text)
}

/// Pair every `*.wav` under `wav_dir` (recursively, sorted by path) with
/// its transcript, keeping those shorter than `max_target_len` characters.
///
/// WAV files without a metadata entry are skipped.
pub fn collect_examples(
    wav_dir: impl AsRef<Path>,
    id_to_text: &HashMap<String, String>,
    max_target_len: usize,
) -> Result<Vec<Example>> {
    let mut wavs = find_wavs(wav_dir.as_ref())?;
    wavs.sort();

    let mut examples = Vec::new();
    let mut missing = 0usize;
    for audio_path in wavs {
        let Some(id) = audio_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match id_to_text.get(id) {
            Some(text) if text.chars().count() < max_target_len => examples.push(Example {
                audio_path: audio_path.clone(),
                transcript: text.clone(),
            }),
            Some(_) => {}
            None => missing += 1,
        }
    }
    if missing > 0 {
        tracing::warn!(missing, "wav files without a metadata entry were skipped");
    }
    tracing::info!(examples = examples.len(), "collected dataset examples");
    Ok(examples)
}

/// Walk `dir` for `*.wav` files. Symlinked directories are not descended
/// into.
fn find_wavs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.map_err(|e| Error::Dataset(format!("{}: {e}", dir.display())))?;
        let path = entry.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
        {
            out.push(path.to_path_buf());
        }
    }
    Ok(out)
}

/// Ordered split: the first `fraction` of examples train, the rest validate.
pub fn split(examples: &[Example], fraction: f64) -> (Vec<Example>, Vec<Example>) {
    let cut = ((examples.len() as f64) * fraction.clamp(0.0, 1.0)) as usize;
    (examples[..cut].to_vec(), examples[cut..].to_vec())
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// One training/evaluation step's worth of aligned inputs.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[B, frames, bins]` f32 spectrograms.
    pub source: Tensor,
    /// `[B, max_len]` u32 token sequences.
    pub target: Tensor,
}

impl Batch {
    /// Wrap pre-built tensors after checking them against the expected
    /// `(frames, bins)` and `max_len`.
    pub fn new(
        source: Tensor,
        target: Tensor,
        frames: usize,
        bins: usize,
        max_len: usize,
    ) -> Result<Self> {
        let source_dims = source.dims().to_vec();
        let target_dims = target.dims().to_vec();
        let [batch, f, b] = source_dims[..] else {
            return Err(Error::Shape(format!(
                "source must be [batch, frames, bins], got {source_dims:?}"
            )));
        };
        if (f, b) != (frames, bins) {
            return Err(Error::Shape(format!(
                "source frames/bins {f}x{b}, expected {frames}x{bins}"
            )));
        }
        if target_dims != [batch, max_len] {
            return Err(Error::Shape(format!(
                "target {target_dims:?} does not match [{batch}, {max_len}]"
            )));
        }
        if batch == 0 {
            return Err(Error::Shape("empty batch".into()));
        }
        Ok(Self { source, target })
    }

    /// Stack per-example features and token sequences into a batch.
    pub fn from_examples(
        sources: &[crate::audio::Spectrogram],
        targets: &[Vec<u32>],
        frames: usize,
        bins: usize,
        max_len: usize,
        device: &Device,
    ) -> Result<Self> {
        if sources.len() != targets.len() {
            return Err(Error::Shape(format!(
                "{} sources but {} targets",
                sources.len(),
                targets.len()
            )));
        }
        for (i, (s, t)) in sources.iter().zip(targets).enumerate() {
            if s.num_frames() != frames || s.num_bins() != bins || t.len() != max_len {
                return Err(Error::Shape(format!(
                    "example {i}: source {}x{}, target {}; expected {frames}x{bins}, {max_len}",
                    s.num_frames(),
                    s.num_bins(),
                    t.len()
                )));
            }
        }
        let batch = sources.len();
        let source_data: Vec<f32> = sources
            .iter()
            .flat_map(|s| s.as_slice().iter().copied())
            .collect();
        let target_data: Vec<u32> = targets.iter().flatten().copied().collect();
        let source = Tensor::from_vec(source_data, (batch, frames, bins), device)?;
        let target = Tensor::from_vec(target_data, (batch, max_len), device)?;
        Self::new(source, target, frames, bins, max_len)
    }

    pub fn len(&self) -> usize {
        self.source.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Lazily turns examples into batches: WAV → mono → spectrogram, transcript
/// → token sequence. The final batch may be smaller than `batch_size`.
pub struct BatchLoader {
    examples: Vec<Example>,
    order: Vec<usize>,
    batch_size: usize,
    extractor: SpectrogramExtractor,
    vectorizer: Vectorizer,
    device: Device,
}

impl BatchLoader {
    pub fn new(
        examples: Vec<Example>,
        batch_size: usize,
        config: &AsrConfig,
        device: &Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be non-zero".into()));
        }
        let order = (0..examples.len()).collect();
        Ok(Self {
            examples,
            order,
            batch_size,
            extractor: SpectrogramExtractor::new(config.features.clone())?,
            vectorizer: Vectorizer::new(config.model.target_maxlen),
            device: device.clone(),
        })
    }

    pub fn num_examples(&self) -> usize {
        self.examples.len()
    }

    pub fn num_batches(&self) -> usize {
        self.examples.len().div_ceil(self.batch_size)
    }

    /// Reorder examples for the next pass.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }

    /// Examples making up batch `index`, in loader order.
    pub fn batch_examples(&self, index: usize) -> Vec<&Example> {
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.order.len());
        self.order[start.min(end)..end]
            .iter()
            .map(|&i| &self.examples[i])
            .collect()
    }

    /// Load and featurize batch `index`.
    pub fn batch(&self, index: usize) -> Result<Batch> {
        let examples = self.batch_examples(index);
        let mut sources = Vec::with_capacity(examples.len());
        let mut targets = Vec::with_capacity(examples.len());
        for example in examples {
            let (samples, _sample_rate) = read_wav_mono(&example.audio_path)?;
            sources.push(self.extractor.extract(&samples));
            targets.push(self.vectorizer.encode(&example.transcript));
        }
        let cfg = self.extractor.config();
        Batch::from_examples(
            &sources,
            &targets,
            cfg.pad_len,
            cfg.num_bins(),
            self.vectorizer.max_len(),
            &self.device,
        )
    }

    /// All batches in order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Batch>> + '_ {
        (0..self.num_batches()).map(move |i| self.batch(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use candle_core::DType;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const METADATA: &str = "\
LJ001-0001|Printing, in the only sense|Printing, in the only sense
LJ001-0002|in being comparatively modern.|in being comparatively modern.
LJ001-0003|For although the Chinese took impressions from wood blocks engraved in relief|For although the Chinese took impressions from wood blocks engraved in relief
";

    fn small_config() -> AsrConfig {
        let mut cfg = AsrConfig::default();
        cfg.features.pad_len = 30;
        cfg.model.source_maxlen = 30;
        cfg.model.target_maxlen = 40;
        cfg.training.max_target_len = 40;
        cfg
    }

    fn write_dataset(dir: &Path) {
        std::fs::write(dir.join("metadata.csv"), METADATA).unwrap();
        let wavs = dir.join("wavs");
        std::fs::create_dir(&wavs).unwrap();
        for (i, id) in ["LJ001-0001", "LJ001-0002", "LJ001-0003", "LJ999-0000"]
            .iter()
            .enumerate()
        {
            let samples: Vec<f32> = (0..1500 + i * 300)
                .map(|n| (n as f32 * 0.05 * (i + 1) as f32).sin())
                .collect();
            write_wav(wavs.join(format!("{id}.wav")), &samples, 22050, 1).unwrap();
        }
    }

    #[test]
    fn parse_metadata_uses_normalized_field() {
        let map = parse_metadata("a|raw text|normalized text\n\nb|x|y\n").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "normalized text");
        assert_eq!(map["b"], "y");
    }

    #[test]
    fn malformed_metadata_reports_line() {
        let err = parse_metadata("a|b|c\nbroken line\n").unwrap_err();
        match err {
            Error::Dataset(msg) => assert!(msg.contains("line 2"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn collect_filters_by_length_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path());
        let meta = load_metadata(dir.path().join("metadata.csv")).unwrap();
        let examples = collect_examples(dir.path().join("wavs"), &meta, 40).unwrap();
        // 0003 is too long, 9999 has no metadata.
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].transcript, "Printing, in the only sense");
        assert!(examples[1].audio_path.ends_with("LJ001-0002.wav"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_is_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let wavs = dir.path().join("wavs");
        std::fs::create_dir(&wavs).unwrap();
        write_wav(wavs.join("LJ001-0001.wav"), &[0.0; 400], 22050, 1).unwrap();
        std::os::unix::fs::symlink(&wavs, wavs.join("again")).unwrap();

        let meta = parse_metadata("LJ001-0001|hi|hi\n").unwrap();
        let examples = collect_examples(&wavs, &meta, 50).unwrap();
        assert_eq!(examples.len(), 1);
        assert!(examples[0].audio_path.ends_with("LJ001-0001.wav"));
    }

    #[test]
    fn nested_directories_are_searched() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        write_wav(nested.join("x.WAV"), &[0.0; 400], 22050, 1).unwrap();
        std::fs::write(dir.path().join("a").join("x.txt"), "not audio").unwrap();

        let meta = parse_metadata("x|one|one\n").unwrap();
        let examples = collect_examples(dir.path(), &meta, 50).unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].transcript, "one");
    }

    #[test]
    fn split_is_ordered() {
        let examples: Vec<Example> = (0..10)
            .map(|i| Example {
                audio_path: PathBuf::from(format!("{i}.wav")),
                transcript: i.to_string(),
            })
            .collect();
        let (train, val) = split(&examples, 0.8);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        assert_eq!(val[0].transcript, "8");
    }

    #[test]
    fn batch_rejects_mismatched_shapes() {
        let dev = Device::Cpu;
        let source = Tensor::zeros((2, 30, 129), DType::F32, &dev).unwrap();
        let target = Tensor::zeros((2, 40), DType::U32, &dev).unwrap();
        assert!(Batch::new(source.clone(), target.clone(), 30, 129, 40).is_ok());
        assert!(matches!(
            Batch::new(source.clone(), target.clone(), 31, 129, 40),
            Err(Error::Shape(_))
        ));
        let short_batch = Tensor::zeros((3, 40), DType::U32, &dev).unwrap();
        assert!(matches!(
            Batch::new(source.clone(), short_batch, 30, 129, 40),
            Err(Error::Shape(_))
        ));
        let flat = Tensor::zeros((30, 129), DType::F32, &dev).unwrap();
        assert!(matches!(
            Batch::new(flat, target, 30, 129, 40),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn loader_produces_fixed_shape_batches() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path());
        let cfg = small_config();
        let meta = load_metadata(dir.path().join("metadata.csv")).unwrap();
        let examples = collect_examples(dir.path().join("wavs"), &meta, 40).unwrap();

        let loader = BatchLoader::new(examples, 1, &cfg, &Device::Cpu).unwrap();
        assert_eq!(loader.num_batches(), 2);
        let batches: Vec<Batch> = loader.iter().collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 2);
        for batch in &batches {
            assert_eq!(batch.source.dims(), &[1, 30, 129]);
            assert_eq!(batch.target.dims(), &[1, 40]);
        }
        let first = batches[0].target.to_vec2::<u32>().unwrap();
        assert_eq!(first[0][0], crate::text::START_INDEX);
    }

    #[test]
    fn shuffle_is_seeded() {
        let examples: Vec<Example> = (0..20)
            .map(|i| Example {
                audio_path: PathBuf::from(format!("{i}.wav")),
                transcript: i.to_string(),
            })
            .collect();
        let cfg = small_config();
        let order = |seed| {
            let mut loader = BatchLoader::new(examples.clone(), 4, &cfg, &Device::Cpu).unwrap();
            loader.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
            loader
                .batch_examples(0)
                .iter()
                .map(|e| e.transcript.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(7), order(7));
        let loader = BatchLoader::new(examples.clone(), 4, &cfg, &Device::Cpu).unwrap();
        assert_eq!(loader.num_batches(), 5);
        assert_eq!(loader.batch_examples(4).len(), 4);
        assert!(loader.batch_examples(5).is_empty());
    }
}
