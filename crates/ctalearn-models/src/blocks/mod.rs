//! Built-in extractors and heads.
//!
//! All components exchange channel-last tensors (`[batch, W, H, C]`); the
//! convolutional ones switch to candle's channel-first layout internally.

pub mod alexnet;
pub mod baseline;
pub mod mobilenet;
pub mod resnet;

use candle_core::Tensor;
use candle_nn::{Conv2d, Conv2dConfig, Module, VarBuilder};
use ctalearn_core::{CtaLearnError, Result};

use crate::candle_err;

/// Spatial size after a convolution or pooling window.
pub(crate) fn conv_out(size: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    (size + 2 * padding).saturating_sub(kernel) / stride + 1
}

/// `[b, W, H, C]` -> contiguous `[b, C, W, H]`.
pub(crate) fn to_channels_first(xs: &Tensor) -> Result<Tensor> {
    xs.permute((0, 3, 1, 2))
        .and_then(|t| t.contiguous())
        .map_err(candle_err("permute to channels-first"))
}

/// `[b, C, W, H]` -> contiguous `[b, W, H, C]`.
pub(crate) fn to_channels_last(xs: &Tensor) -> Result<Tensor> {
    xs.permute((0, 2, 3, 1))
        .and_then(|t| t.contiguous())
        .map_err(candle_err("permute to channels-last"))
}

pub(crate) fn relu6(xs: &Tensor) -> Result<Tensor> {
    xs.clamp(0f32, 6f32).map_err(candle_err("relu6"))
}

/// Mean over the spatial dims of a channel-first map: `[b, C, W, H]` -> `[b, C]`.
pub(crate) fn global_avg_pool(xs: &Tensor) -> Result<Tensor> {
    xs.flatten_from(2)
        .and_then(|t| t.mean(2))
        .map_err(candle_err("global average pool"))
}

/// Require a channel-last `[W, H, C]` input shape of at least `min_spatial`.
pub(crate) fn feature_map_dims(
    component: &str,
    shape: &[usize],
    min_spatial: usize,
) -> Result<(usize, usize, usize)> {
    match *shape {
        [w, h, c] if w >= min_spatial && h >= min_spatial && c > 0 => Ok((w, h, c)),
        [w, h, c] => Err(CtaLearnError::Config(format!(
            "{component} needs spatial dims >= {min_spatial} and channels > 0, got {w}x{h}x{c}"
        ))),
        _ => Err(CtaLearnError::Config(format!(
            "{component} needs a [W, H, C] input, got {shape:?}"
        ))),
    }
}

pub(crate) fn conv(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    vb: VarBuilder,
) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        padding,
        stride,
        ..Default::default()
    };
    candle_nn::conv2d(in_channels, out_channels, kernel, cfg, vb)
        .map_err(candle_err("create conv2d"))
}

/// Depthwise 3x3 convolution followed by a pointwise 1x1 projection.
pub(crate) struct SeparableConv {
    depthwise: Conv2d,
    pointwise: Conv2d,
}

impl SeparableConv {
    pub(crate) fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let dw_cfg = Conv2dConfig {
            padding: 1,
            stride,
            groups: in_channels,
            ..Default::default()
        };
        let depthwise = candle_nn::conv2d(in_channels, in_channels, 3, dw_cfg, vb.pp("dw"))
            .map_err(candle_err("create depthwise conv"))?;
        let pointwise = conv(in_channels, out_channels, 1, 1, 0, vb.pp("pw"))?;
        Ok(Self {
            depthwise,
            pointwise,
        })
    }

    /// Channel-first forward: depthwise -> ReLU6 -> pointwise -> ReLU6.
    pub(crate) fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self
            .depthwise
            .forward(xs)
            .map_err(candle_err("depthwise conv"))?;
        let xs = relu6(&xs)?;
        let xs = self
            .pointwise
            .forward(&xs)
            .map_err(candle_err("pointwise conv"))?;
        relu6(&xs)
    }
}

/// Two 3x3 convolutions with an identity or 1x1-projection shortcut.
pub(crate) struct ResidualBlock {
    conv1: Conv2d,
    conv2: Conv2d,
    shortcut: Option<Conv2d>,
}

impl ResidualBlock {
    pub(crate) fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv1 = conv(in_channels, out_channels, 3, stride, 1, vb.pp("conv1"))?;
        let conv2 = conv(out_channels, out_channels, 3, 1, 1, vb.pp("conv2"))?;
        let shortcut = if stride != 1 || in_channels != out_channels {
            Some(conv(in_channels, out_channels, 1, stride, 0, vb.pp("shortcut"))?)
        } else {
            None
        };
        Ok(Self {
            conv1,
            conv2,
            shortcut,
        })
    }

    /// Channel-first forward.
    pub(crate) fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let residual = match &self.shortcut {
            Some(proj) => proj.forward(xs).map_err(candle_err("residual shortcut"))?,
            None => xs.clone(),
        };
        let ys = self
            .conv1
            .forward(xs)
            .and_then(|t| t.relu())
            .map_err(candle_err("residual conv1"))?;
        let ys = self.conv2.forward(&ys).map_err(candle_err("residual conv2"))?;
        (ys + residual)
            .and_then(|t| t.relu())
            .map_err(candle_err("residual add"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_out_arithmetic() {
        assert_eq!(conv_out(32, 3, 1, 1), 32);
        assert_eq!(conv_out(32, 3, 2, 1), 16);
        assert_eq!(conv_out(33, 3, 2, 1), 17);
        assert_eq!(conv_out(32, 5, 1, 2), 32);
        assert_eq!(conv_out(8, 1, 2, 0), 4);
    }

    #[test]
    fn test_feature_map_dims_validation() {
        assert_eq!(feature_map_dims("t", &[4, 4, 2], 2).unwrap(), (4, 4, 2));
        assert!(matches!(
            feature_map_dims("t", &[1, 4, 2], 2),
            Err(CtaLearnError::Config(_))
        ));
        assert!(matches!(
            feature_map_dims("t", &[16], 2),
            Err(CtaLearnError::Config(_))
        ));
    }
}
