//! Zeroing of telescopes that did not trigger.
//!
//! Applied identically in training and inference: a telescope without a
//! trigger contributes no feature signal, only its position and trigger
//! metadata added later by fusion.

use candle_core::Tensor;
use ctalearn_core::{CtaLearnError, Result};

use crate::candle_err;

/// Keep the rows of `features` (`[batch, ...]`) whose trigger (`[batch]`) is
/// non-zero and replace the others with exact zeros, including non-finite
/// values.
///
/// # Errors
///
/// Returns [`CtaLearnError::ShapeMismatch`] when `triggers` is not a vector
/// with one entry per batch element.
pub fn mask_untriggered(features: &Tensor, triggers: &Tensor) -> Result<Tensor> {
    let batch = features.dim(0).map_err(candle_err("feature batch dim"))?;
    if triggers.dims() != [batch] {
        return Err(CtaLearnError::ShapeMismatch(format!(
            "trigger slice {:?} does not match feature batch size {batch}",
            triggers.dims()
        )));
    }

    let mut gate_shape = vec![1usize; features.rank()];
    gate_shape[0] = batch;
    let gate = triggers
        .ne(0f32)
        .and_then(|g| g.reshape(gate_shape))
        .and_then(|g| g.broadcast_as(features.shape()))
        .map_err(candle_err("build trigger gate"))?;
    let zeros = features.zeros_like().map_err(candle_err("zero features"))?;

    gate.where_cond(features, &zeros)
        .map_err(candle_err("apply trigger gate"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_untriggered_rows_are_zeroed() {
        let device = Device::Cpu;
        let features = Tensor::ones((3, 4), DType::F32, &device).unwrap();
        let triggers = Tensor::new(&[1f32, 0., 1.], &device).unwrap();
        let masked = mask_untriggered(&features, &triggers).unwrap();
        assert_eq!(
            masked.to_vec2::<f32>().unwrap(),
            vec![vec![1.0; 4], vec![0.0; 4], vec![1.0; 4]]
        );
    }

    #[test]
    fn test_gate_is_binary() {
        let device = Device::Cpu;
        let features = Tensor::full(2f32, (2, 2), &device).unwrap();
        let triggers = Tensor::new(&[0.25f32, 0.], &device).unwrap();
        let masked = mask_untriggered(&features, &triggers).unwrap();
        assert_eq!(
            masked.to_vec2::<f32>().unwrap(),
            vec![vec![2.0, 2.0], vec![0.0, 0.0]]
        );
    }

    #[test]
    fn test_feature_maps_are_masked_per_event() {
        let device = Device::Cpu;
        let features = Tensor::ones((2, 3, 3, 5), DType::F32, &device).unwrap();
        let triggers = Tensor::new(&[0f32, 1.], &device).unwrap();
        let masked = mask_untriggered(&features, &triggers).unwrap();
        let per_event: Vec<f32> = masked
            .flatten_from(1)
            .unwrap()
            .sum(1)
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(per_event, vec![0.0, 45.0]);
    }

    #[test]
    fn test_non_finite_untriggered_rows_become_zero() {
        let device = Device::Cpu;
        let features = Tensor::new(
            &[[f32::NAN, f32::INFINITY], [1.5, 2.5], [f32::NEG_INFINITY, 3.0]],
            &device,
        )
        .unwrap();
        let triggers = Tensor::new(&[0f32, 1., 0.], &device).unwrap();
        let masked = mask_untriggered(&features, &triggers).unwrap();
        assert_eq!(
            masked.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 0.0], vec![1.5, 2.5], vec![0.0, 0.0]]
        );
    }

    #[test]
    fn test_trigger_length_mismatch() {
        let device = Device::Cpu;
        let features = Tensor::ones((3, 4), DType::F32, &device).unwrap();
        let triggers = Tensor::ones(2, DType::F32, &device).unwrap();
        assert!(matches!(
            mask_untriggered(&features, &triggers),
            Err(CtaLearnError::ShapeMismatch(_))
        ));
    }
}
