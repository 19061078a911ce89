//! Residual extractor plus the two residual-family heads.

use candle_core::Tensor;
use candle_nn::{Conv2d, Dropout, Linear, Module, VarBuilder};
use ctalearn_core::{CtaLearnError, ImageShape, Result};

use super::{
    conv, conv_out, feature_map_dims, global_avg_pool, to_channels_first, to_channels_last,
    ResidualBlock,
};
use crate::candle_err;
use crate::component::{ArrayHead, FeatureLayout, HeadSpec, TelescopeExtractor};

const STEM_CHANNELS: usize = 32;
const BLOCK_CHANNELS: usize = 64;
const HEAD_CHANNELS: usize = 64;
const VECTOR_HIDDEN: [usize; 2] = [512, 256];

/// Stem convolution, one identity residual block, one downsampling residual block.
pub struct ResNetBlock {
    stem: Conv2d,
    block1: ResidualBlock,
    block2: ResidualBlock,
    output_shape: [usize; 3],
}

impl ResNetBlock {
    pub fn new(image: ImageShape, vb: VarBuilder) -> Result<Self> {
        let (w, h, c) = feature_map_dims("resnet block", &image.dims(), 2)?;
        let stem = conv(c, STEM_CHANNELS, 3, 1, 1, vb.pp("stem"))?;
        let block1 = ResidualBlock::new(STEM_CHANNELS, STEM_CHANNELS, 1, vb.pp("block1"))?;
        let block2 = ResidualBlock::new(STEM_CHANNELS, BLOCK_CHANNELS, 2, vb.pp("block2"))?;
        Ok(Self {
            stem,
            block1,
            block2,
            output_shape: [conv_out(w, 3, 2, 1), conv_out(h, 3, 2, 1), BLOCK_CHANNELS],
        })
    }
}

impl TelescopeExtractor for ResNetBlock {
    fn name(&self) -> &'static str {
        "resnet"
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn forward(&self, images: &Tensor, _triggers: &Tensor, _train: bool) -> Result<Tensor> {
        let xs = to_channels_first(images)?;
        let xs = self
            .stem
            .forward(&xs)
            .and_then(|t| t.relu())
            .map_err(candle_err("resnet stem"))?;
        let xs = self.block1.forward(&xs)?;
        let xs = self.block2.forward(&xs)?;
        to_channels_last(&xs)
    }
}

/// 1x1 projection, residual block, global average pool, linear classifier.
pub struct ResNetHead {
    projection: Conv2d,
    block: ResidualBlock,
    classifier: Linear,
}

impl ResNetHead {
    pub fn new(spec: &HeadSpec, vb: VarBuilder) -> Result<Self> {
        let (_, _, c) = feature_map_dims("resnet head", &spec.input_shape, 1)?;
        let projection = conv(c, HEAD_CHANNELS, 1, 1, 0, vb.pp("projection"))?;
        let block = ResidualBlock::new(HEAD_CHANNELS, HEAD_CHANNELS, 1, vb.pp("block"))?;
        let classifier = candle_nn::linear(HEAD_CHANNELS, spec.num_classes, vb.pp("classifier"))
            .map_err(candle_err("create resnet head classifier"))?;
        Ok(Self {
            projection,
            block,
            classifier,
        })
    }
}

impl ArrayHead for ResNetHead {
    fn name(&self) -> &'static str {
        "resnet"
    }

    fn input_layout(&self) -> FeatureLayout {
        FeatureLayout::FeatureMap
    }

    fn forward(&self, array_features: &Tensor, _train: bool) -> Result<Tensor> {
        let xs = to_channels_first(array_features)?;
        let xs = self
            .projection
            .forward(&xs)
            .and_then(|t| t.relu())
            .map_err(candle_err("resnet head projection"))?;
        let xs = self.block.forward(&xs)?;
        let xs = global_avg_pool(&xs)?;
        self.classifier
            .forward(&xs)
            .map_err(candle_err("resnet head classifier"))
    }
}

/// Fully connected head over concatenated telescope feature vectors.
pub struct ResNetFeatureVectorHead {
    fc1: Linear,
    fc2: Linear,
    classifier: Linear,
    dropout: Dropout,
}

impl ResNetFeatureVectorHead {
    pub fn new(spec: &HeadSpec, vb: VarBuilder) -> Result<Self> {
        let input_dim = match spec.input_shape.as_slice() {
            [d] if *d > 0 => *d,
            other => {
                return Err(CtaLearnError::Config(format!(
                    "resnetfeaturevector head needs a [D] input, got {other:?}"
                )))
            }
        };
        let fc1 = candle_nn::linear(input_dim, VECTOR_HIDDEN[0], vb.pp("fc1"))
            .map_err(candle_err("create feature-vector head fc1"))?;
        let fc2 = candle_nn::linear(VECTOR_HIDDEN[0], VECTOR_HIDDEN[1], vb.pp("fc2"))
            .map_err(candle_err("create feature-vector head fc2"))?;
        let classifier = candle_nn::linear(VECTOR_HIDDEN[1], spec.num_classes, vb.pp("classifier"))
            .map_err(candle_err("create feature-vector head classifier"))?;
        Ok(Self {
            fc1,
            fc2,
            classifier,
            dropout: Dropout::new(spec.dropout_rate),
        })
    }
}

impl ArrayHead for ResNetFeatureVectorHead {
    fn name(&self) -> &'static str {
        "resnetfeaturevector"
    }

    fn input_layout(&self) -> FeatureLayout {
        FeatureLayout::Vector
    }

    fn forward(&self, array_features: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self
            .fc1
            .forward(array_features)
            .and_then(|t| t.relu())
            .map_err(candle_err("feature-vector head fc1"))?;
        let xs = self
            .dropout
            .forward(&xs, train)
            .map_err(candle_err("feature-vector head dropout"))?;
        let xs = self
            .fc2
            .forward(&xs)
            .and_then(|t| t.relu())
            .map_err(candle_err("feature-vector head fc2"))?;
        self.classifier
            .forward(&xs)
            .map_err(candle_err("feature-vector head classifier"))
    }
}
