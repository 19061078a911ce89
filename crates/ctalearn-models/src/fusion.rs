//! Array feature fusion.
//!
//! Combines the ordered per-telescope feature tensors with each telescope's
//! static position vector and per-event trigger flag into a single array-level
//! tensor. Telescope `i`'s block always lands at position `i` of the
//! concatenation, so heads can rely on a stable telescope order.
//!
//! # Layouts
//!
//! ```text
//! vector:     [B, Σ(D_i + A + 1)]          (features | position | trigger) per telescope
//! featuremap: [B, W', H', Σ(C_i + A + 1)]  same, stacked along channels
//! ```

use candle_core::{IndexOp, Tensor};
use ctalearn_core::{CtaLearnError, Result, TelescopeCombination};

use crate::candle_err;
use crate::component::FeatureLayout;

/// Layout produced by a fusion strategy.
#[must_use]
pub fn output_layout(combination: TelescopeCombination) -> FeatureLayout {
    match combination {
        TelescopeCombination::Vector => FeatureLayout::Vector,
        TelescopeCombination::FeatureMap => FeatureLayout::FeatureMap,
    }
}

/// Static non-batch fused shape for `num_telescopes` telescopes that all
/// produce features of `telescope_shape`.
///
/// # Errors
///
/// Returns [`CtaLearnError::Config`] when feature-map fusion is asked to
/// stack features that are not `[W, H, C]` maps.
pub fn fused_shape(
    combination: TelescopeCombination,
    telescope_shape: &[usize],
    num_telescopes: usize,
    num_auxiliary_inputs: usize,
) -> Result<Vec<usize>> {
    match combination {
        TelescopeCombination::Vector => {
            let width: usize = telescope_shape.iter().product();
            Ok(vec![num_telescopes * (width + num_auxiliary_inputs + 1)])
        }
        TelescopeCombination::FeatureMap => match *telescope_shape {
            [w, h, c] => Ok(vec![w, h, num_telescopes * (c + num_auxiliary_inputs + 1)]),
            _ => Err(CtaLearnError::Config(format!(
                "featuremap fusion needs [W, H, C] telescope features, got {telescope_shape:?}"
            ))),
        },
    }
}

/// Dispatch to the selected fusion strategy.
pub fn combine(
    combination: TelescopeCombination,
    telescope_outputs: &[Tensor],
    telescope_positions: &Tensor,
    telescope_triggers: &Tensor,
) -> Result<Tensor> {
    match combination {
        TelescopeCombination::Vector => {
            combine_as_vectors(telescope_outputs, telescope_positions, telescope_triggers)
        }
        TelescopeCombination::FeatureMap => {
            combine_as_feature_maps(telescope_outputs, telescope_positions, telescope_triggers)
        }
    }
}

/// Flatten each telescope's features and append its position and trigger.
///
/// Per-telescope feature widths may differ.
///
/// # Errors
///
/// Returns [`CtaLearnError::ShapeMismatch`] when the position table, the
/// trigger matrix, and the output list disagree on telescope count or batch size.
pub fn combine_as_vectors(
    telescope_outputs: &[Tensor],
    telescope_positions: &Tensor,
    telescope_triggers: &Tensor,
) -> Result<Tensor> {
    let (batch, aux) = check_metadata(telescope_outputs, telescope_positions, telescope_triggers)?;

    let mut array_inputs = Vec::with_capacity(telescope_outputs.len());
    for (i, features) in telescope_outputs.iter().enumerate() {
        let features = features
            .flatten_from(1)
            .map_err(candle_err("flatten telescope features"))?;
        let position = telescope_positions
            .i(i)
            .and_then(|p| p.unsqueeze(0))
            .and_then(|p| p.broadcast_as((batch, aux)))
            .and_then(|p| p.contiguous())
            .map_err(candle_err("tile telescope position"))?;
        let trigger = telescope_triggers
            .narrow(1, i, 1)
            .map_err(candle_err("slice telescope trigger"))?;
        let block = Tensor::cat(&[&features, &position, &trigger], 1)
            .map_err(candle_err("concatenate telescope vector"))?;
        array_inputs.push(block);
    }

    Tensor::cat(&array_inputs, 1).map_err(candle_err("concatenate array vector"))
}

/// Append each telescope's position and trigger as constant channels of its
/// feature map, then stack all maps along the channel axis.
///
/// # Errors
///
/// Returns [`CtaLearnError::ShapeMismatch`] when any output is not a rank-4
/// map, when spatial dims differ between telescopes, or when the metadata
/// tensors disagree with the outputs.
pub fn combine_as_feature_maps(
    telescope_outputs: &[Tensor],
    telescope_positions: &Tensor,
    telescope_triggers: &Tensor,
) -> Result<Tensor> {
    let (batch, aux) = check_metadata(telescope_outputs, telescope_positions, telescope_triggers)?;

    let mut spatial: Option<(usize, usize)> = None;
    let mut array_inputs = Vec::with_capacity(telescope_outputs.len());
    for (i, features) in telescope_outputs.iter().enumerate() {
        let (w, h) = match *features.dims() {
            [_, w, h, _] => (w, h),
            _ => {
                return Err(CtaLearnError::ShapeMismatch(format!(
                    "telescope {i} output {:?} is not a [batch, W, H, C] feature map",
                    features.dims()
                )))
            }
        };
        match spatial {
            None => spatial = Some((w, h)),
            Some(first) if first != (w, h) => {
                return Err(CtaLearnError::ShapeMismatch(format!(
                    "telescope {i} feature map is {w}x{h}, telescope 0 is {}x{}",
                    first.0, first.1
                )))
            }
            Some(_) => {}
        }

        let position = telescope_positions
            .i(i)
            .and_then(|p| p.reshape((1, 1, 1, aux)))
            .and_then(|p| p.broadcast_as((batch, w, h, aux)))
            .and_then(|p| p.contiguous())
            .map_err(candle_err("tile telescope position map"))?;
        let trigger = telescope_triggers
            .narrow(1, i, 1)
            .and_then(|t| t.reshape((batch, 1, 1, 1)))
            .and_then(|t| t.broadcast_as((batch, w, h, 1)))
            .and_then(|t| t.contiguous())
            .map_err(candle_err("tile telescope trigger map"))?;
        let block = Tensor::cat(&[features, &position, &trigger], 3)
            .map_err(candle_err("concatenate telescope channels"))?;
        array_inputs.push(block);
    }

    Tensor::cat(&array_inputs, 3).map_err(candle_err("concatenate array feature maps"))
}

/// Validate positions `[N, A]` and triggers `[B, N]` against the outputs;
/// returns `(B, A)`.
fn check_metadata(
    telescope_outputs: &[Tensor],
    telescope_positions: &Tensor,
    telescope_triggers: &Tensor,
) -> Result<(usize, usize)> {
    let n = telescope_outputs.len();
    if n == 0 {
        return Err(CtaLearnError::ShapeMismatch(
            "no telescope outputs to combine".to_string(),
        ));
    }
    let aux = match *telescope_positions.dims() {
        [rows, aux] if rows == n => aux,
        _ => {
            return Err(CtaLearnError::ShapeMismatch(format!(
                "telescope positions {:?} do not match {n} telescopes",
                telescope_positions.dims()
            )))
        }
    };
    let batch = match *telescope_triggers.dims() {
        [batch, cols] if cols == n => batch,
        _ => {
            return Err(CtaLearnError::ShapeMismatch(format!(
                "telescope triggers {:?} do not match {n} telescopes",
                telescope_triggers.dims()
            )))
        }
    };
    for (i, features) in telescope_outputs.iter().enumerate() {
        let rows = features.dims().first().copied().unwrap_or(0);
        if rows != batch {
            return Err(CtaLearnError::ShapeMismatch(format!(
                "telescope {i} output has batch {rows}, triggers have batch {batch}"
            )));
        }
    }
    Ok((batch, aux))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn positions(device: &Device) -> Tensor {
        Tensor::new(&[[10f32, 11.], [20., 21.]], device).unwrap()
    }

    #[test]
    fn test_vector_fusion_layout() {
        let device = Device::Cpu;
        let t0 = Tensor::new(&[[1f32, 2., 3.]], &device).unwrap();
        let t1 = Tensor::new(&[[4f32]], &device).unwrap();
        let triggers = Tensor::new(&[[1f32, 0.]], &device).unwrap();
        let fused = combine_as_vectors(&[t0, t1], &positions(&device), &triggers).unwrap();
        assert_eq!(
            fused.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 2.0, 3.0, 10.0, 11.0, 1.0, 4.0, 20.0, 21.0, 0.0]]
        );
    }

    #[test]
    fn test_vector_fusion_flattens_feature_maps() {
        let device = Device::Cpu;
        let maps = vec![
            Tensor::ones((3, 2, 2, 2), DType::F32, &device).unwrap(),
            Tensor::ones((3, 2, 2, 2), DType::F32, &device).unwrap(),
        ];
        let triggers = Tensor::ones((3, 2), DType::F32, &device).unwrap();
        let fused = combine_as_vectors(&maps, &positions(&device), &triggers).unwrap();
        assert_eq!(fused.dims(), &[3, 2 * (8 + 2 + 1)]);
    }

    #[test]
    fn test_feature_map_fusion_layout() {
        let device = Device::Cpu;
        let maps = vec![
            Tensor::full(5f32, (2, 3, 4, 1), &device).unwrap(),
            Tensor::full(7f32, (2, 3, 4, 2), &device).unwrap(),
        ];
        let triggers = Tensor::new(&[[1f32, 0.], [0., 1.]], &device).unwrap();
        let fused = combine_as_feature_maps(&maps, &positions(&device), &triggers).unwrap();
        assert_eq!(fused.dims(), &[2, 3, 4, (1 + 3) + (2 + 3)]);

        // Every pixel of event 1 carries the same channel vector.
        let pixel: Vec<f32> = fused.i((1, 2, 3)).unwrap().to_vec1().unwrap();
        assert_eq!(
            pixel,
            vec![5.0, 10.0, 11.0, 0.0, 7.0, 7.0, 20.0, 21.0, 1.0]
        );
    }

    #[test]
    fn test_feature_map_fusion_rejects_mixed_spatial_dims() {
        let device = Device::Cpu;
        let maps = vec![
            Tensor::ones((1, 4, 4, 2), DType::F32, &device).unwrap(),
            Tensor::ones((1, 2, 2, 2), DType::F32, &device).unwrap(),
        ];
        let triggers = Tensor::ones((1, 2), DType::F32, &device).unwrap();
        assert!(matches!(
            combine_as_feature_maps(&maps, &positions(&device), &triggers),
            Err(CtaLearnError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_feature_map_fusion_rejects_vectors() {
        let device = Device::Cpu;
        let maps = vec![
            Tensor::ones((1, 4), DType::F32, &device).unwrap(),
            Tensor::ones((1, 4), DType::F32, &device).unwrap(),
        ];
        let triggers = Tensor::ones((1, 2), DType::F32, &device).unwrap();
        assert!(matches!(
            combine_as_feature_maps(&maps, &positions(&device), &triggers),
            Err(CtaLearnError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_metadata_mismatch() {
        let device = Device::Cpu;
        let outputs = vec![Tensor::ones((2, 3), DType::F32, &device).unwrap()];
        let triggers = Tensor::ones((2, 1), DType::F32, &device).unwrap();
        // two position rows for one telescope
        assert!(matches!(
            combine_as_vectors(&outputs, &positions(&device), &triggers),
            Err(CtaLearnError::ShapeMismatch(_))
        ));

        let one_position = Tensor::new(&[[1f32, 2.]], &device).unwrap();
        let wrong_batch = Tensor::ones((3, 1), DType::F32, &device).unwrap();
        assert!(matches!(
            combine_as_vectors(&outputs, &one_position, &wrong_batch),
            Err(CtaLearnError::ShapeMismatch(_))
        ));
        assert!(matches!(
            combine_as_vectors(&[], &one_position, &triggers),
            Err(CtaLearnError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_fused_shape() {
        assert_eq!(
            fused_shape(TelescopeCombination::Vector, &[4, 4, 8], 3, 2).unwrap(),
            vec![3 * (128 + 3)]
        );
        assert_eq!(
            fused_shape(TelescopeCombination::FeatureMap, &[4, 4, 8], 3, 2).unwrap(),
            vec![4, 4, 33]
        );
        assert!(matches!(
            fused_shape(TelescopeCombination::FeatureMap, &[16], 3, 2),
            Err(CtaLearnError::Config(_))
        ));
        assert_eq!(
            output_layout(TelescopeCombination::FeatureMap),
            FeatureLayout::FeatureMap
        );
    }
}
