//! MobileNet-style extractor and head built from depthwise-separable convolutions.

use candle_core::Tensor;
use candle_nn::{Conv2d, Dropout, Linear, Module, VarBuilder};
use ctalearn_core::{ImageShape, Result};

use super::{
    conv, conv_out, feature_map_dims, global_avg_pool, relu6, to_channels_first,
    to_channels_last, SeparableConv,
};
use crate::candle_err;
use crate::component::{ArrayHead, FeatureLayout, HeadSpec, TelescopeExtractor};

const STEM_CHANNELS: usize = 32;
const BLOCK_CHANNELS: [usize; 2] = [64, 128];
const HEAD_CHANNELS: usize = 256;

/// Stride-2 stem followed by two separable stages (stride 1, then stride 2).
pub struct MobileNetBlock {
    stem: Conv2d,
    stage1: SeparableConv,
    stage2: SeparableConv,
    output_shape: [usize; 3],
}

impl MobileNetBlock {
    pub fn new(image: ImageShape, vb: VarBuilder) -> Result<Self> {
        let (w, h, c) = feature_map_dims("mobilenet block", &image.dims(), 2)?;
        let stem = conv(c, STEM_CHANNELS, 3, 2, 1, vb.pp("stem"))?;
        let stage1 = SeparableConv::new(STEM_CHANNELS, BLOCK_CHANNELS[0], 1, vb.pp("stage1"))?;
        let stage2 =
            SeparableConv::new(BLOCK_CHANNELS[0], BLOCK_CHANNELS[1], 2, vb.pp("stage2"))?;
        let out = |n: usize| conv_out(conv_out(n, 3, 2, 1), 3, 2, 1);
        Ok(Self {
            stem,
            stage1,
            stage2,
            output_shape: [out(w), out(h), BLOCK_CHANNELS[1]],
        })
    }
}

impl TelescopeExtractor for MobileNetBlock {
    fn name(&self) -> &'static str {
        "mobilenet"
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn forward(&self, images: &Tensor, _triggers: &Tensor, _train: bool) -> Result<Tensor> {
        let xs = to_channels_first(images)?;
        let xs = self.stem.forward(&xs).map_err(candle_err("mobilenet stem"))?;
        let xs = relu6(&xs)?;
        let xs = self.stage1.forward(&xs)?;
        let xs = self.stage2.forward(&xs)?;
        to_channels_last(&xs)
    }
}

/// Separable convolution, global average pool, linear classifier.
pub struct MobileNetHead {
    separable: SeparableConv,
    dropout: Dropout,
    classifier: Linear,
}

impl MobileNetHead {
    pub fn new(spec: &HeadSpec, vb: VarBuilder) -> Result<Self> {
        let (_, _, c) = feature_map_dims("mobilenet head", &spec.input_shape, 1)?;
        let separable = SeparableConv::new(c, HEAD_CHANNELS, 1, vb.pp("separable"))?;
        let classifier = candle_nn::linear(HEAD_CHANNELS, spec.num_classes, vb.pp("classifier"))
            .map_err(candle_err("create mobilenet head classifier"))?;
        Ok(Self {
            separable,
            dropout: Dropout::new(spec.dropout_rate),
            classifier,
        })
    }
}

impl ArrayHead for MobileNetHead {
    fn name(&self) -> &'static str {
        "mobilenet"
    }

    fn input_layout(&self) -> FeatureLayout {
        FeatureLayout::FeatureMap
    }

    fn forward(&self, array_features: &Tensor, train: bool) -> Result<Tensor> {
        let xs = to_channels_first(array_features)?;
        let xs = self.separable.forward(&xs)?;
        let xs = global_avg_pool(&xs)?;
        let xs = self
            .dropout
            .forward(&xs, train)
            .map_err(candle_err("mobilenet head dropout"))?;
        self.classifier
            .forward(&xs)
            .map_err(candle_err("mobilenet head classifier"))
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
        let block = MobileNetBlock::new(ImageShape::new(32, 20, 1), vb).unwrap();
        assert_eq!(block.output_shape(), &[8, 5, 128]);

        let images = Tensor::ones((2, 32, 20, 1), DType::F32, &device).unwrap();
        let triggers = Tensor::ones(2, DType::F32, &device).unwrap();
        let out = block.forward(&images, &triggers, false).unwrap();
        assert_eq!(out.dims(), &[2, 8, 5, 128]);
    }

    #[test]
    fn test_head_produces_logits() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let spec = HeadSpec {
            input_shape: vec![4, 4, 9],
            num_classes: 3,
            dropout_rate: 0.2,
        };
        let head = MobileNetHead::new(&spec, vb).unwrap();
        let xs = Tensor::ones((2, 4, 4, 9), DType::F32, &device).unwrap();
        assert_eq!(head.forward(&xs, false).unwrap().dims(), &[2, 3]);
    }
}
