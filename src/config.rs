//! Configuration for the speech Transformer and its training run.
//!
//! Every struct deserializes from JSON with per-field defaults, so a config
//! file only needs to name the fields it overrides. Defaults reproduce the
//! reference LJSpeech setup: 200-wide hidden state, 2 heads, 4 encoder
//! layers, 1 decoder layer, 34 output classes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsrConfig {
    #[serde(default)]
    pub model: TransformerConfig,
    #[serde(default)]
    pub features: SpectrogramConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl AsrConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty-printed JSON.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.features.validate()?;
        self.schedule.validate()?;
        if self.model.num_freq_bins != self.features.num_bins() {
            return Err(Error::Config(format!(
                "model expects {} frequency bins but fft_length {} yields {}",
                self.model.num_freq_bins,
                self.features.fft_length,
                self.features.num_bins()
            )));
        }
        if self.model.source_maxlen != self.features.pad_len {
            return Err(Error::Config(format!(
                "model source_maxlen {} differs from spectrogram pad_len {}",
                self.model.source_maxlen, self.features.pad_len
            )));
        }
        if self.training.max_target_len != self.model.target_maxlen {
            return Err(Error::Config(format!(
                "training max_target_len {} differs from model target_maxlen {}",
                self.training.max_target_len, self.model.target_maxlen
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Hyperparameters of the encoder-decoder Transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerConfig {
    /// Hidden width shared by embeddings, attention output and blocks.
    #[serde(default = "default_num_hid")]
    pub num_hid: usize,

    /// Number of attention heads.
    #[serde(default = "default_num_head")]
    pub num_head: usize,

    /// Per-head query/key/value width. `None` means `num_hid`.
    #[serde(default)]
    pub key_dim: Option<usize>,

    /// Inner width of the position-wise feed-forward network.
    #[serde(default = "default_num_feed_forward")]
    pub num_feed_forward: usize,

    /// Spectrogram frames per source example.
    #[serde(default = "default_source_maxlen")]
    pub source_maxlen: usize,

    /// Token positions per target example, start and end markers included.
    #[serde(default = "default_target_maxlen")]
    pub target_maxlen: usize,

    /// Frequency bins per spectrogram frame.
    #[serde(default = "default_num_freq_bins")]
    pub num_freq_bins: usize,

    #[serde(default = "default_num_layers_enc")]
    pub num_layers_enc: usize,

    #[serde(default = "default_num_layers_dec")]
    pub num_layers_dec: usize,

    /// Output classes (vocabulary size).
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,

    /// Dropout on encoder attention and feed-forward outputs.
    #[serde(default = "default_dropout")]
    pub encoder_dropout: f32,

    /// Dropout on the decoder's causal self-attention output.
    #[serde(default = "default_decoder_self_attention_dropout")]
    pub decoder_self_attention_dropout: f32,

    /// Dropout on the decoder's cross-attention and feed-forward outputs.
    #[serde(default = "default_dropout")]
    pub decoder_dropout: f32,

    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            num_hid: default_num_hid(),
            num_head: default_num_head(),
            key_dim: None,
            num_feed_forward: default_num_feed_forward(),
            source_maxlen: default_source_maxlen(),
            target_maxlen: default_target_maxlen(),
            num_freq_bins: default_num_freq_bins(),
            num_layers_enc: default_num_layers_enc(),
            num_layers_dec: default_num_layers_dec(),
            num_classes: default_num_classes(),
            encoder_dropout: default_dropout(),
            decoder_self_attention_dropout: default_decoder_self_attention_dropout(),
            decoder_dropout: default_dropout(),
            layer_norm_eps: default_layer_norm_eps(),
        }
    }
}

impl TransformerConfig {
    /// Per-head key dimension.
    pub fn key_dim(&self) -> usize {
        self.key_dim.unwrap_or(self.num_hid)
    }

    /// Encoder sequence length after the three stride-2 convolutions.
    pub fn encoded_len(&self) -> usize {
        (0..3).fold(self.source_maxlen, |len, _| len.div_ceil(2))
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_hid == 0 || self.num_head == 0 || self.key_dim() == 0 {
            return Err(Error::Config(
                "num_hid, num_head and key_dim must be non-zero".into(),
            ));
        }
        if self.target_maxlen < 2 {
            return Err(Error::Config(format!(
                "target_maxlen must be at least 2, got {}",
                self.target_maxlen
            )));
        }
        if self.source_maxlen == 0 {
            return Err(Error::Config("source_maxlen must be non-zero".into()));
        }
        for (name, p) in [
            ("encoder_dropout", self.encoder_dropout),
            (
                "decoder_self_attention_dropout",
                self.decoder_self_attention_dropout,
            ),
            ("decoder_dropout", self.decoder_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::Config(format!("{name} must be in [0, 1), got {p}")));
            }
        }
        Ok(())
    }
}

fn default_num_hid() -> usize {
    200
}
fn default_num_head() -> usize {
    2
}
fn default_num_feed_forward() -> usize {
    400
}
fn default_source_maxlen() -> usize {
    2754
}
fn default_target_maxlen() -> usize {
    200
}
fn default_num_freq_bins() -> usize {
    129
}
fn default_num_layers_enc() -> usize {
    4
}
fn default_num_layers_dec() -> usize {
    1
}
fn default_num_classes() -> usize {
    34
}
fn default_dropout() -> f32 {
    0.1
}
fn default_decoder_self_attention_dropout() -> f32 {
    0.5
}
fn default_layer_norm_eps() -> f64 {
    1e-6
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// STFT and padding parameters for the spectrogram front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrogramConfig {
    /// Samples per analysis window.
    #[serde(default = "default_frame_length")]
    pub frame_length: usize,

    /// Hop between consecutive windows.
    #[serde(default = "default_frame_step")]
    pub frame_step: usize,

    /// FFT size; windows are zero-padded up to this length.
    #[serde(default = "default_fft_length")]
    pub fft_length: usize,

    /// Output frame count after padding/truncation.
    #[serde(default = "default_pad_len")]
    pub pad_len: usize,

    /// Exponent applied to the magnitude spectrum.
    #[serde(default = "default_power")]
    pub power: f32,

    /// Added to the per-bin standard deviation before dividing.
    #[serde(default = "default_norm_epsilon")]
    pub norm_epsilon: f32,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            frame_length: default_frame_length(),
            frame_step: default_frame_step(),
            fft_length: default_fft_length(),
            pad_len: default_pad_len(),
            power: default_power(),
            norm_epsilon: default_norm_epsilon(),
        }
    }
}

impl SpectrogramConfig {
    /// One-sided frequency bins: `fft_length / 2 + 1`.
    pub fn num_bins(&self) -> usize {
        self.fft_length / 2 + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_length == 0 || self.frame_step == 0 || self.pad_len == 0 {
            return Err(Error::Config(
                "frame_length, frame_step and pad_len must be non-zero".into(),
            ));
        }
        if self.fft_length < self.frame_length {
            return Err(Error::Config(format!(
                "fft_length {} is shorter than frame_length {}",
                self.fft_length, self.frame_length
            )));
        }
        Ok(())
    }
}

fn default_frame_length() -> usize {
    200
}
fn default_frame_step() -> usize {
    80
}
fn default_fft_length() -> usize {
    256
}
fn default_pad_len() -> usize {
    2754
}
fn default_power() -> f32 {
    0.5
}
fn default_norm_epsilon() -> f32 {
    1e-6
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Piecewise-linear warm-up/decay learning-rate schedule parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_init_lr")]
    pub init_lr: f64,
    #[serde(default = "default_lr_after_warmup")]
    pub lr_after_warmup: f64,
    #[serde(default = "default_final_lr")]
    pub final_lr: f64,
    #[serde(default = "default_warmup_epochs")]
    pub warmup_epochs: u32,
    #[serde(default = "default_decay_epochs")]
    pub decay_epochs: u32,
    /// Optimizer updates per epoch; the training driver overwrites this from
    /// the dataset size.
    #[serde(default = "default_steps_per_epoch")]
    pub steps_per_epoch: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            init_lr: default_init_lr(),
            lr_after_warmup: default_lr_after_warmup(),
            final_lr: default_final_lr(),
            warmup_epochs: default_warmup_epochs(),
            decay_epochs: default_decay_epochs(),
            steps_per_epoch: default_steps_per_epoch(),
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.warmup_epochs < 2 {
            return Err(Error::Config(format!(
                "warmup_epochs must be at least 2, got {}",
                self.warmup_epochs
            )));
        }
        if self.decay_epochs == 0 || self.steps_per_epoch == 0 {
            return Err(Error::Config(
                "decay_epochs and steps_per_epoch must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_init_lr() -> f64 {
    1e-5
}
fn default_lr_after_warmup() -> f64 {
    1e-3
}
fn default_final_lr() -> f64 {
    1e-5
}
fn default_warmup_epochs() -> u32 {
    15
}
fn default_decay_epochs() -> u32 {
    85
}
fn default_steps_per_epoch() -> u64 {
    203
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// Training-loop and optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_val_batch_size")]
    pub val_batch_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Transcripts with this many characters or more are dropped; also the
    /// vectorizer's output length.
    #[serde(default = "default_max_target_len")]
    pub max_target_len: usize,
    /// Fraction of examples used for training; the rest validate.
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    #[serde(default = "default_label_smoothing")]
    pub label_smoothing: f64,
    /// Run the prediction display every this many epochs.
    #[serde(default = "default_display_every")]
    pub display_every: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_adam_eps")]
    pub adam_eps: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            val_batch_size: default_val_batch_size(),
            epochs: default_epochs(),
            max_target_len: default_max_target_len(),
            train_fraction: default_train_fraction(),
            label_smoothing: default_label_smoothing(),
            display_every: default_display_every(),
            seed: None,
            beta1: default_beta1(),
            beta2: default_beta2(),
            adam_eps: default_adam_eps(),
        }
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_val_batch_size() -> usize {
    4
}
fn default_epochs() -> usize {
    100
}
fn default_max_target_len() -> usize {
    200
}
fn default_train_fraction() -> f64 {
    0.99
}
fn default_label_smoothing() -> f64 {
    0.1
}
fn default_display_every() -> usize {
    5
}
fn default_beta1() -> f64 {
    0.9
}
fn default_beta2() -> f64 {
    0.999
}
fn default_adam_eps() -> f64 {
    1e-7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_consistent() {
        let cfg = AsrConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.features.num_bins(), 129);
        assert_eq!(cfg.model.key_dim(), 200);
        assert_eq!(cfg.model.num_classes, 34);
    }

    #[test]
    fn encoded_len_downsamples_by_eight() {
        let cfg = TransformerConfig::default();
        // 2754 → 1377 → 689 → 345
        assert_eq!(cfg.encoded_len(), 345);
    }

    #[test]
    fn deserialize_partial_json() {
        let json = r#"{"model": {"num_hid": 64, "num_layers_enc": 2}}"#;
        let cfg: AsrConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.model.num_hid, 64);
        assert_eq!(cfg.model.num_layers_enc, 2);
        // Unspecified fields should use defaults.
        assert_eq!(cfg.model.num_head, 2);
        assert_eq!(cfg.model.key_dim(), 64);
        assert_eq!(cfg.schedule.warmup_epochs, 15);
    }

    #[test]
    fn mismatched_bins_rejected() {
        let mut cfg = AsrConfig::default();
        cfg.features.fft_length = 512;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn short_warmup_rejected() {
        let cfg = ScheduleConfig {
            warmup_epochs: 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = AsrConfig::default();
        cfg.model.num_hid = 32;
        cfg.to_json_file(&path).unwrap();
        let loaded = AsrConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.model.num_hid, 32);
        assert_eq!(loaded.features.pad_len, 2754);
    }
}
