//! Parameter-free extractors, useful as deterministic baselines.

use candle_core::Tensor;
use ctalearn_core::{ImageShape, Result};

use crate::candle_err;
use crate::component::TelescopeExtractor;

/// Passes the image through unchanged as a `[W, H, C]` feature map.
pub struct IdentityBlock {
    output_shape: [usize; 3],
}

impl IdentityBlock {
    pub fn new(image: ImageShape) -> Self {
        Self {
            output_shape: image.dims(),
        }
    }
}

impl TelescopeExtractor for IdentityBlock {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn forward(&self, images: &Tensor, _triggers: &Tensor, _train: bool) -> Result<Tensor> {
        Ok(images.clone())
    }
}

/// Sums every channel over the spatial dims, giving a `[C]` vector.
pub struct SumPoolBlock {
    output_shape: [usize; 1],
}

impl SumPoolBlock {
    pub fn new(image: ImageShape) -> Self {
        Self {
            output_shape: [image.depth],
        }
    }
}

impl TelescopeExtractor for SumPoolBlock {
    fn name(&self) -> &'static str {
        "sumpool"
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn forward(&self, images: &Tensor, _triggers: &Tensor, _train: bool) -> Result<Tensor> {
        // [b, W, H, C] -> [b, C]
        images
            .sum(1)
            .and_then(|t| t.sum(1))
            .map_err(candle_err("sum pool"))
    }
}
