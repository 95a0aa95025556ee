//! Input embeddings for both sides of the Transformer.
//!
//! - [`TokenEmbedding`] — learned token table + learned position table (text)
//! - [`SpeechFeatureEmbedding`] — three strided 1-D convolutions (audio)
//!
//! ```text
//! tokens [B, L] ──► emb(tokens) + pos_emb(0..L) ──► [B, L, hid]
//!
//! spectrogram [B, T, bins]
//!   ──► Conv1d(k=11, s=2, same) → ReLU     [B, ⌈T/2⌉, hid]
//!   ──► Conv1d(k=11, s=2, same) → ReLU     [B, ⌈T/4⌉, hid]
//!   ──► Conv1d(k=11, s=2, same) → ReLU     [B, ⌈T/8⌉, hid]
//! ```
//!
//! The audio path has no positional table; the convolutions' local receptive
//! field carries the ordering.

use candle_core::{Module, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Embedding, Init, VarBuilder};

use crate::{Error, Result};

const CONV_KERNEL: usize = 11;
const CONV_STRIDE: usize = 2;
const CONV_LAYERS: usize = 3;

/// Token + position embedding for target sequences.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    emb: Embedding,
    pos_emb: Embedding,
    maxlen: usize,
}

impl TokenEmbedding {
    pub fn new(vb: VarBuilder, num_vocab: usize, maxlen: usize, num_hid: usize) -> Result<Self> {
        Ok(Self {
            emb: uniform_embedding(vb.pp("emb"), num_vocab, num_hid)?,
            pos_emb: uniform_embedding(vb.pp("pos_emb"), maxlen, num_hid)?,
            maxlen,
        })
    }

    /// `tokens`: `[B, L]` u32 with `L <= maxlen` → `[B, L, num_hid]`.
    pub fn forward(&self, tokens: &Tensor) -> Result<Tensor> {
        let (_, len) = tokens.dims2()?;
        if len > self.maxlen {
            return Err(Error::Shape(format!(
                "target length {len} exceeds position table size {}",
                self.maxlen
            )));
        }
        let positions = Tensor::arange(0u32, len as u32, tokens.device())?;
        let pos = self.pos_emb.forward(&positions)?; // [L, hid]
        let tok = self.emb.forward(tokens)?; // [B, L, hid]
        Ok(tok.broadcast_add(&pos)?)
    }
}

/// Embedding table initialised uniformly in [-0.05, 0.05].
fn uniform_embedding(vb: VarBuilder, rows: usize, dim: usize) -> Result<Embedding> {
    let weight = vb.get_with_hints(
        (rows, dim),
        "weight",
        Init::Uniform {
            lo: -0.05,
            up: 0.05,
        },
    )?;
    Ok(Embedding::new(weight, dim))
}

/// Convolutional downsampling front end for spectrogram frames.
#[derive(Debug, Clone)]
pub struct SpeechFeatureEmbedding {
    convs: Vec<Conv1d>,
}

impl SpeechFeatureEmbedding {
    pub fn new(vb: VarBuilder, num_freq_bins: usize, num_hid: usize) -> Result<Self> {
        let config = Conv1dConfig {
            stride: CONV_STRIDE,
            ..Default::default()
        };
        let mut convs = Vec::with_capacity(CONV_LAYERS);
        for i in 0..CONV_LAYERS {
            let in_channels = if i == 0 { num_freq_bins } else { num_hid };
            convs.push(candle_nn::conv1d(
                in_channels,
                num_hid,
                CONV_KERNEL,
                config,
                vb.pp(format!("conv{}", i + 1)),
            )?);
        }
        Ok(Self { convs })
    }

    /// `x`: `[B, T, bins]` → `[B, T', num_hid]` with `T' = ⌈⌈⌈T/2⌉/2⌉/2⌉`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // Channels-first for conv1d: [B, bins, T]
        let mut h = x.transpose(1, 2)?.contiguous()?;
        for conv in &self.convs {
            let len = h.dim(2)?;
            let (left, right) = same_padding(len, CONV_KERNEL, CONV_STRIDE);
            h = h.pad_with_zeros(2, left, right)?;
            h = conv.forward(&h)?.relu()?;
        }
        Ok(h.transpose(1, 2)?.contiguous()?)
    }

    /// Output length for an input of `len` frames.
    pub fn output_len(len: usize) -> usize {
        (0..CONV_LAYERS).fold(len, |l, _| l.div_ceil(CONV_STRIDE))
    }
}

/// "Same" padding for a strided convolution: output length is
/// `⌈len / stride⌉`, with the odd extra pad element on the right.
fn same_padding(len: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out_len = len.div_ceil(stride);
    let total = ((out_len.saturating_sub(1)) * stride + kernel).saturating_sub(len);
    let left = total / 2;
    (left, total - left)
}
