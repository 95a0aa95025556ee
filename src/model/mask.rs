//! Attention mask construction.
//!
//! Masks are `u8` tensors with 1 for visible and 0 for hidden positions,
//! converted to additive biases right before the softmax.

use candle_core::{DType, Device, Result, Tensor};

/// Large negative bias for hidden positions. Finite so fully-masked rows
/// degrade to a uniform softmax instead of NaN.
const MASK_BIAS: f64 = -1e9;

/// Causal mask `[seq_len, seq_len]` where `mask[i][j] = (i >= j)`.
///
/// Position `i` may attend to itself and every earlier position.
pub fn causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mut mask_data = vec![0u8; seq_len * seq_len];
    for i in 0..seq_len {
        for j in 0..=i {
            mask_data[i * seq_len + j] = 1;
        }
    }
    Tensor::from_vec(mask_data, (seq_len, seq_len), device)
}

/// Causal mask broadcast over the batch: `[batch, seq_len, seq_len]`.
pub fn causal_attention_mask(batch: usize, seq_len: usize, device: &Device) -> Result<Tensor> {
    causal_mask(seq_len, device)?
        .unsqueeze(0)?
        .broadcast_as((batch, seq_len, seq_len))?
        .contiguous()
}

/// Convert a visibility mask to an additive bias: 0 where visible,
/// [`MASK_BIAS`] where hidden.
pub fn mask_to_bias(mask: &Tensor, dtype: DType) -> Result<Tensor> {
    mask.to_dtype(dtype)?.affine(-MASK_BIAS, MASK_BIAS)
}
