//! Label-smoothed, padding-masked categorical cross-entropy.

use candle_core::{D, DType, Tensor};

use crate::{Error, Result};

/// Cross-entropy between `logits` and smoothed one-hot `targets`.
///
/// - `logits`: `[B, L, C]`
/// - `targets`: `[B, L]` u32 class indices
/// - `pad_index`: positions whose target equals this contribute nothing
/// - `smoothing`: target distribution is `(1 - s) * one_hot + s / C`
///
/// Returns a scalar: the mean loss over non-padding positions (0 when every
/// position is padding).
pub fn masked_cross_entropy(
    logits: &Tensor,
    targets: &Tensor,
    pad_index: u32,
    smoothing: f64,
) -> Result<Tensor> {
    let (batch, len, num_classes) = logits.dims3()?;
    if targets.dims() != [batch, len].as_slice() {
        return Err(Error::Shape(format!(
            "targets {:?} do not match logits [{batch}, {len}, {num_classes}]",
            targets.dims()
        )));
    }

    let off = smoothing / num_classes as f64;
    let on = 1.0 - smoothing + off;
    let smoothed =
        candle_nn::encoding::one_hot(targets.clone(), num_classes, on as f32, off as f32)?
            .to_dtype(logits.dtype())?;

    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    let per_token = (smoothed * log_probs)?.sum(D::Minus1)?.neg()?; // [B, L]

    let mask = targets.ne(pad_index)?.to_dtype(logits.dtype())?;
    let total = (per_token * &mask)?.sum_all()?;
    let count = mask.sum_all()?.maximum(1.0)?;
    Ok(total.div(&count)?.to_dtype(DType::F32)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn perfect_prediction_without_smoothing_is_near_zero() {
        let dev = Device::Cpu;
        let targets = Tensor::new(&[[1u32, 2]], &dev).unwrap();
        let logits = Tensor::new(&[[[0f32, 50.0, 0.0], [0.0, 0.0, 50.0]]], &dev).unwrap();
        let loss: f32 = masked_cross_entropy(&logits, &targets, 0, 0.0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(loss < 1e-4, "loss = {loss}");
    }

    #[test]
    fn uniform_logits_give_log_num_classes() {
        let dev = Device::Cpu;
        let targets = Tensor::new(&[[1u32, 2, 3]], &dev).unwrap();
        let logits = Tensor::zeros((1, 3, 4), DType::F32, &dev).unwrap();
        let loss: f32 = masked_cross_entropy(&logits, &targets, 0, 0.1)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!((loss - 4f32.ln()).abs() < 1e-5, "loss = {loss}");
    }

    #[test]
    fn padding_positions_are_ignored() {
        let dev = Device::Cpu;
        let logits = Tensor::randn(0f32, 1.0, (1, 4, 5), &dev).unwrap();
        let targets = Tensor::new(&[[2u32, 3, 0, 0]], &dev).unwrap();
        let full: f32 = masked_cross_entropy(&logits, &targets, 0, 0.1)
            .unwrap()
            .to_scalar()
            .unwrap();

        let head = logits.narrow(1, 0, 2).unwrap();
        let head_targets = targets.narrow(1, 0, 2).unwrap();
        let trimmed: f32 = masked_cross_entropy(&head, &head_targets, 0, 0.1)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!((full - trimmed).abs() < 1e-5);
    }

    #[test]
    fn all_padding_entry_contributes_nothing() {
        let dev = Device::Cpu;
        let logits = Tensor::randn(0f32, 1.0, (2, 3, 5), &dev).unwrap();
        let targets = Tensor::new(&[[2u32, 4, 3], [0, 0, 0]], &dev).unwrap();
        let both: f32 = masked_cross_entropy(&logits, &targets, 0, 0.1)
            .unwrap()
            .to_scalar()
            .unwrap();

        let first = logits.narrow(0, 0, 1).unwrap();
        let first_targets = targets.narrow(0, 0, 1).unwrap();
        let alone: f32 = masked_cross_entropy(&first, &first_targets, 0, 0.1)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!((both - alone).abs() < 1e-5);

        let pad_only = targets.narrow(0, 1, 1).unwrap();
        let second = logits.narrow(0, 1, 1).unwrap();
        let zero: f32 = masked_cross_entropy(&second, &pad_only, 0, 0.1)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(zero, 0.0);
    }

    #[test]
    fn mismatched_targets_rejected() {
        let dev = Device::Cpu;
        let logits = Tensor::zeros((1, 3, 4), DType::F32, &dev).unwrap();
        let targets = Tensor::zeros((1, 2), DType::U32, &dev).unwrap();
        assert!(matches!(
            masked_cross_entropy(&logits, &targets, 0, 0.1),
            Err(Error::Shape(_))
        ));
    }
}
