//! Multi-head scaled dot-product attention.
//!
//! Query, key and value each get their own biased projection to
//! `num_heads * key_dim`; heads attend independently and are concatenated
//! back through an output projection to the model width. Used for encoder
//! self-attention, causal decoder self-attention and decoder→encoder
//! cross-attention.

use candle_core::{D, Module, Tensor};
use candle_nn::VarBuilder;

use super::mask::mask_to_bias;
use crate::Result;

/// Standard multi-head attention.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    query: candle_nn::Linear,
    key: candle_nn::Linear,
    value: candle_nn::Linear,
    output: candle_nn::Linear,
    num_heads: usize,
    key_dim: usize,
}

impl MultiHeadAttention {
    pub fn new(vb: VarBuilder, dim: usize, num_heads: usize, key_dim: usize) -> Result<Self> {
        let inner_dim = num_heads * key_dim;
        let query = candle_nn::linear(dim, inner_dim, vb.pp("query"))?;
        let key = candle_nn::linear(dim, inner_dim, vb.pp("key"))?;
        let value = candle_nn::linear(dim, inner_dim, vb.pp("value"))?;
        let output = candle_nn::linear(inner_dim, dim, vb.pp("output"))?;
        Ok(Self {
            query,
            key,
            value,
            output,
            num_heads,
            key_dim,
        })
    }

    /// Forward pass.
    ///
    /// - `query`: `[B, T_q, dim]`
    /// - `context`: `[B, T_k, dim]` — keys and values (same tensor as `query`
    ///   for self-attention)
    /// - `mask`: optional `[B, T_q, T_k]` or `[T_q, T_k]`, 1 = attend
    ///
    /// Returns `[B, T_q, dim]`.
    pub fn forward(&self, query: &Tensor, context: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (batch, q_len, _) = query.dims3()?;
        let (_, k_len, _) = context.dims3()?;

        // [B, T, H*D] → [B, H, T, D]
        let q = self.split_heads(&self.query.forward(query)?, batch, q_len)?;
        let k = self.split_heads(&self.key.forward(context)?, batch, k_len)?;
        let v = self.split_heads(&self.value.forward(context)?, batch, k_len)?;

        let scale = (self.key_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? / scale)?; // [B, H, T_q, T_k]

        let scores = match mask {
            Some(mask) => {
                let bias = mask_to_bias(mask, scores.dtype())?;
                // Insert the head axis: [B, 1, T_q, T_k] or [1, 1, T_q, T_k].
                let bias = match bias.rank() {
                    2 => bias.unsqueeze(0)?.unsqueeze(0)?,
                    _ => bias.unsqueeze(1)?,
                };
                scores.broadcast_add(&bias)?
            }
            None => scores,
        };

        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let out = attn.matmul(&v)?; // [B, H, T_q, D]

        let out = out
            .transpose(1, 2)? // [B, T_q, H, D]
            .reshape((batch, q_len, self.num_heads * self.key_dim))?;

        self.output.forward(&out).map_err(Into::into)
    }

    fn split_heads(&self, x: &Tensor, batch: usize, len: usize) -> Result<Tensor> {
        Ok(x
            .reshape((batch, len, self.num_heads, self.key_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }
}
