//! Interfaces of the pluggable model components.

use candle_core::Tensor;
use ctalearn_core::Result;

/// Tensor layout a component produces or consumes (batch axis excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureLayout {
    /// Flat feature vector, `[batch, D]`.
    Vector,
    /// Channel-last spatial map, `[batch, W, H, C]`.
    FeatureMap,
}

impl FeatureLayout {
    /// Classify a non-batch shape; `None` for ranks that are neither.
    #[must_use]
    pub fn of_shape(shape: &[usize]) -> Option<Self> {
        match shape.len() {
            1 => Some(Self::Vector),
            3 => Some(Self::FeatureMap),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeatureLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vector => f.write_str("vector"),
            Self::FeatureMap => f.write_str("feature map"),
        }
    }
}

/// Per-telescope encoder.
///
/// One instance is built per model and invoked once per telescope index, so
/// every telescope is processed with the same parameters.
pub trait TelescopeExtractor: Send + Sync {
    /// Registry name of this extractor.
    fn name(&self) -> &'static str;

    /// Non-batch shape of the features produced for one telescope.
    fn output_shape(&self) -> &[usize];

    /// Encode one telescope across the batch.
    ///
    /// * `images` — `[batch, W, H, C]` channel-last images
    /// * `triggers` — `[batch]` trigger flags for this telescope
    fn forward(&self, images: &Tensor, triggers: &Tensor, train: bool) -> Result<Tensor>;
}

/// Array-level classifier consuming fused telescope features.
pub trait ArrayHead: Send + Sync {
    /// Registry name of this head.
    fn name(&self) -> &'static str;

    /// Layout the head expects its input in.
    fn input_layout(&self) -> FeatureLayout;

    /// Produce `[batch, num_classes]` logits.
    fn forward(&self, array_features: &Tensor, train: bool) -> Result<Tensor>;
}

/// Construction-time description of a head's input and output.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadSpec {
    /// Non-batch shape of the fused array tensor.
    pub input_shape: Vec<usize>,
    /// Number of output classes.
    pub num_classes: usize,
    /// Dropout probability for heads that use dropout.
    pub dropout_rate: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_of_shape() {
        assert_eq!(FeatureLayout::of_shape(&[12]), Some(FeatureLayout::Vector));
        assert_eq!(
            FeatureLayout::of_shape(&[4, 4, 8]),
            Some(FeatureLayout::FeatureMap)
        );
        assert_eq!(FeatureLayout::of_shape(&[4, 4]), None);
        assert_eq!(FeatureLayout::of_shape(&[]), None);
    }
}
