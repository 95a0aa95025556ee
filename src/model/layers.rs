//! Transformer blocks.
//!
//! - [`TransformerEncoderLayer`] — self-attention + feed-forward, post-norm
//! - [`TransformerDecoderLayer`] — causal self-attention + cross-attention +
//!   feed-forward, post-norm
//!
//! Both apply dropout to each sub-layer output before the residual add, and
//! only when `train` is set.

use candle_core::{D, Module, Tensor};
use candle_nn::{Dropout, Init, VarBuilder};

use super::attention::MultiHeadAttention;
use super::mask::causal_attention_mask;
use crate::Result;
use crate::config::TransformerConfig;

// ---------------------------------------------------------------------------
// Layer norm
// ---------------------------------------------------------------------------

/// Layer normalization over the last axis with learned scale and shift.
///
/// Built from primitive tensor ops so gradients flow through it.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(dim, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias, eps })
    }
}

impl Module for LayerNorm {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

// ---------------------------------------------------------------------------
// Feed-forward
// ---------------------------------------------------------------------------

/// Position-wise feed-forward: Linear(dim, hidden) → ReLU → Linear(hidden, dim).
#[derive(Debug, Clone)]
pub struct FeedForward {
    dense_1: candle_nn::Linear,
    dense_2: candle_nn::Linear,
}

impl FeedForward {
    pub fn new(vb: VarBuilder, dim: usize, hidden: usize) -> Result<Self> {
        let dense_1 = candle_nn::linear(dim, hidden, vb.pp("dense_1"))?;
        let dense_2 = candle_nn::linear(hidden, dim, vb.pp("dense_2"))?;
        Ok(Self { dense_1, dense_2 })
    }
}

impl Module for FeedForward {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        x.apply(&self.dense_1)?.relu()?.apply(&self.dense_2)
    }
}

// ---------------------------------------------------------------------------
// Encoder layer
// ---------------------------------------------------------------------------

/// Encoder block over audio embeddings. Full bidirectional attention.
#[derive(Debug, Clone)]
pub struct TransformerEncoderLayer {
    att: MultiHeadAttention,
    ffn: FeedForward,
    layernorm1: LayerNorm,
    layernorm2: LayerNorm,
    dropout1: Dropout,
    dropout2: Dropout,
}

impl TransformerEncoderLayer {
    pub fn new(cfg: &TransformerConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            att: MultiHeadAttention::new(vb.pp("att"), cfg.num_hid, cfg.num_head, cfg.key_dim())?,
            ffn: FeedForward::new(vb.pp("ffn"), cfg.num_hid, cfg.num_feed_forward)?,
            layernorm1: LayerNorm::new(cfg.num_hid, cfg.layer_norm_eps, vb.pp("layernorm1"))?,
            layernorm2: LayerNorm::new(cfg.num_hid, cfg.layer_norm_eps, vb.pp("layernorm2"))?,
            dropout1: Dropout::new(cfg.encoder_dropout),
            dropout2: Dropout::new(cfg.encoder_dropout),
        })
    }

    /// `x`: `[B, T, D]` → `[B, T, D]`.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let attn = self.att.forward(x, x, None)?;
        let attn = self.dropout1.forward(&attn, train)?;
        let out1 = self.layernorm1.forward(&(x + attn)?)?;

        let ffn = self.ffn.forward(&out1)?;
        let ffn = self.dropout2.forward(&ffn, train)?;
        Ok(self.layernorm2.forward(&(out1 + ffn)?)?)
    }
}

// ---------------------------------------------------------------------------
// Decoder layer
// ---------------------------------------------------------------------------

/// Decoder block over target embeddings, conditioned on encoder output.
///
/// The causal self-attention branch uses a heavier dropout rate than the
/// cross-attention and feed-forward branches.
#[derive(Debug, Clone)]
pub struct TransformerDecoderLayer {
    self_att: MultiHeadAttention,
    enc_att: MultiHeadAttention,
    ffn: FeedForward,
    layernorm1: LayerNorm,
    layernorm2: LayerNorm,
    layernorm3: LayerNorm,
    self_dropout: Dropout,
    enc_dropout: Dropout,
    ffn_dropout: Dropout,
}

impl TransformerDecoderLayer {
    pub fn new(cfg: &TransformerConfig, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.num_hid;
        let eps = cfg.layer_norm_eps;
        Ok(Self {
            self_att: MultiHeadAttention::new(vb.pp("self_att"), dim, cfg.num_head, cfg.key_dim())?,
            enc_att: MultiHeadAttention::new(vb.pp("enc_att"), dim, cfg.num_head, cfg.key_dim())?,
            ffn: FeedForward::new(vb.pp("ffn"), dim, cfg.num_feed_forward)?,
            layernorm1: LayerNorm::new(dim, eps, vb.pp("layernorm1"))?,
            layernorm2: LayerNorm::new(dim, eps, vb.pp("layernorm2"))?,
            layernorm3: LayerNorm::new(dim, eps, vb.pp("layernorm3"))?,
            self_dropout: Dropout::new(cfg.decoder_self_attention_dropout),
            enc_dropout: Dropout::new(cfg.decoder_dropout),
            ffn_dropout: Dropout::new(cfg.decoder_dropout),
        })
    }

    /// Forward pass.
    ///
    /// - `enc_out`: `[B, S, D]` — full encoder output, attended without a mask
    /// - `target`: `[B, L, D]` — embedded decoder input
    ///
    /// Returns `[B, L, D]`.
    pub fn forward(&self, enc_out: &Tensor, target: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq_len, _) = target.dims3()?;
        let causal_mask = causal_attention_mask(batch, seq_len, target.device())?;

        let target_att = self.self_att.forward(target, target, Some(&causal_mask))?;
        let target_att = self.self_dropout.forward(&target_att, train)?;
        let target_norm = self.layernorm1.forward(&(target + target_att)?)?;

        let enc_att = self.enc_att.forward(&target_norm, enc_out, None)?;
        let enc_att = self.enc_dropout.forward(&enc_att, train)?;
        let enc_out_norm = self.layernorm2.forward(&(enc_att + &target_norm)?)?;

        let ffn = self.ffn.forward(&enc_out_norm)?;
        let ffn = self.ffn_dropout.forward(&ffn, train)?;
        Ok(self.layernorm3.forward(&(enc_out_norm + ffn)?)?)
    }
}
