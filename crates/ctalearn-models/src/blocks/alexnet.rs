//! AlexNet-style extractor and head.
//!
//! # Architecture
//!
//! ```text
//! block: conv5x5(32) → ReLU → maxpool2 → conv3x3(64) → ReLU → maxpool2 → conv3x3(64) → ReLU
//! head:  conv3x3(128) → ReLU → maxpool2 → flatten → Linear(256) → ReLU → Dropout → Linear(K)
//! ```

use candle_core::Tensor;
use candle_nn::{Conv2d, Dropout, Linear, Module, VarBuilder};
use ctalearn_core::{CtaLearnError, ImageShape, Result};

use super::{conv, conv_out, feature_map_dims, to_channels_first, to_channels_last};
use crate::candle_err;
use crate::component::{ArrayHead, FeatureLayout, HeadSpec, TelescopeExtractor};

const BLOCK_CHANNELS: [usize; 3] = [32, 64, 64];
const HEAD_CHANNELS: usize = 128;
const HEAD_HIDDEN: usize = 256;

/// Three-convolution AlexNet-style telescope encoder.
pub struct AlexNetBlock {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    output_shape: [usize; 3],
}

impl AlexNetBlock {
    pub fn new(image: ImageShape, vb: VarBuilder) -> Result<Self> {
        let (w, h, c) = feature_map_dims("alexnet block", &image.dims(), 4)?;
        let conv1 = conv(c, BLOCK_CHANNELS[0], 5, 1, 2, vb.pp("conv1"))?;
        let conv2 = conv(BLOCK_CHANNELS[0], BLOCK_CHANNELS[1], 3, 1, 1, vb.pp("conv2"))?;
        let conv3 = conv(BLOCK_CHANNELS[1], BLOCK_CHANNELS[2], 3, 1, 1, vb.pp("conv3"))?;
        let pooled = |n: usize| conv_out(conv_out(n, 2, 2, 0), 2, 2, 0);
        Ok(Self {
            conv1,
            conv2,
            conv3,
            output_shape: [pooled(w), pooled(h), BLOCK_CHANNELS[2]],
        })
    }
}

impl TelescopeExtractor for AlexNetBlock {
    fn name(&self) -> &'static str {
        "alexnet"
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn forward(&self, images: &Tensor, _triggers: &Tensor, _train: bool) -> Result<Tensor> {
        let xs = to_channels_first(images)?;
        let xs = self
            .conv1
            .forward(&xs)
            .and_then(|t| t.relu())
            .and_then(|t| t.max_pool2d(2))
            .map_err(candle_err("alexnet conv1"))?;
        let xs = self
            .conv2
            .forward(&xs)
            .and_then(|t| t.relu())
            .and_then(|t| t.max_pool2d(2))
            .map_err(candle_err("alexnet conv2"))?;
        let xs = self
            .conv3
            .forward(&xs)
            .and_then(|t| t.relu())
            .map_err(candle_err("alexnet conv3"))?;
        to_channels_last(&xs)
    }
}

/// Convolutional AlexNet-style array head.
pub struct AlexNetHead {
    conv: Conv2d,
    fc1: Linear,
    fc2: Linear,
    dropout: Dropout,
}

impl AlexNetHead {
    pub fn new(spec: &HeadSpec, vb: VarBuilder) -> Result<Self> {
        let (w, h, c) = feature_map_dims("alexnet head", &spec.input_shape, 2)?;
        let conv = conv(c, HEAD_CHANNELS, 3, 1, 1, vb.pp("conv"))?;
        let flat = conv_out(w, 2, 2, 0) * conv_out(h, 2, 2, 0) * HEAD_CHANNELS;
        if flat == 0 {
            return Err(CtaLearnError::Config(format!(
                "alexnet head input {:?} pools to nothing",
                spec.input_shape
            )));
        }
        let fc1 = candle_nn::linear(flat, HEAD_HIDDEN, vb.pp("fc1"))
            .map_err(candle_err("create alexnet head fc1"))?;
        let fc2 = candle_nn::linear(HEAD_HIDDEN, spec.num_classes, vb.pp("fc2"))
            .map_err(candle_err("create alexnet head fc2"))?;
        Ok(Self {
            conv,
            fc1,
            fc2,
            dropout: Dropout::new(spec.dropout_rate),
        })
    }
}

impl ArrayHead for AlexNetHead {
    fn name(&self) -> &'static str {
        "alexnet"
    }

    fn input_layout(&self) -> FeatureLayout {
        FeatureLayout::FeatureMap
    }

    fn forward(&self, array_features: &Tensor, train: bool) -> Result<Tensor> {
        let xs = to_channels_first(array_features)?;
        let xs = self
            .conv
            .forward(&xs)
            .and_then(|t| t.relu())
            .and_then(|t| t.max_pool2d(2))
            .and_then(|t| t.flatten_from(1))
            .map_err(candle_err("alexnet head conv"))?;
        let xs = self
            .fc1
            .forward(&xs)
            .and_then(|t| t.relu())
            .map_err(candle_err("alexnet head fc1"))?;
        let xs = self
            .dropout
            .forward(&xs, train)
            .map_err(candle_err("alexnet head dropout"))?;
        self.fc2.forward(&xs).map_err(candle_err("alexnet head fc2"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_block_output_shape_matches_forward() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let block = AlexNetBlock::new(ImageShape::new(18, 12, 2), vb).unwrap();
        assert_eq!(block.output_shape(), &[4, 3, 64]);

        let images = Tensor::ones((3, 18, 12, 2), DType::F32, &device).unwrap();
        let triggers = Tensor::ones(3, DType::F32, &device).unwrap();
        let out = block.forward(&images, &triggers, false).unwrap();
        assert_eq!(out.dims(), &[3, 4, 3, 64]);
    }

    #[test]
    fn test_block_rejects_tiny_images() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        assert!(matches!(
            AlexNetBlock::new(ImageShape::new(3, 32, 1), vb),
            Err(CtaLearnError::Config(_))
        ));
    }

    #[test]
    fn test_head_produces_logits() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let spec = HeadSpec {
            input_shape: vec![8, 8, 12],
            num_classes: 2,
            dropout_rate: 0.5,
        };
        let head = AlexNetHead::new(&spec, vb).unwrap();
        let xs = Tensor::ones((4, 8, 8, 12), DType::F32, &device).unwrap();
        let logits = head.forward(&xs, true).unwrap();
        assert_eq!(logits.dims(), &[4, 2]);
        let logits = head.forward(&xs, false).unwrap();
        assert_eq!(logits.dims(), &[4, 2]);
    }
}
