//! Categorical cross-entropy over one-hot encoded class labels.

use candle_core::{DType, Tensor};
use candle_nn::ops::log_softmax;
use ctalearn_core::{CtaLearnError, Result};

use crate::candle_err;

/// One-hot encode `[batch]` u32 class indices to `[batch, num_classes]` f32.
pub fn one_hot_labels(labels: &Tensor, num_classes: usize) -> Result<Tensor> {
    candle_nn::encoding::one_hot(labels.clone(), num_classes, 1f32, 0f32)
        .map_err(candle_err("one-hot encode labels"))
}

/// Mean over the batch of `-Σ onehot · log_softmax(logits)`.
///
/// # Errors
///
/// Returns [`CtaLearnError::ShapeMismatch`] when `labels` is not `[batch]`
/// for `logits` of shape `[batch, num_classes]`.
pub fn softmax_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (batch, num_classes) = logits.dims2().map_err(|_| {
        CtaLearnError::ShapeMismatch(format!(
            "logits {:?} are not [batch, classes]",
            logits.dims()
        ))
    })?;
    if labels.dims() != [batch] {
        return Err(CtaLearnError::ShapeMismatch(format!(
            "labels {:?} do not match {batch} logits rows",
            labels.dims()
        )));
    }

    let labels = labels
        .to_dtype(DType::U32)
        .map_err(candle_err("cast labels"))?;
    let targets = one_hot_labels(&labels, num_classes)?;
    let log_probs = log_softmax(logits, 1).map_err(candle_err("log softmax"))?;
    (targets * log_probs)
        .and_then(|t| t.sum(1))
        .and_then(|t| t.mean(0))
        .and_then(|t| t.neg())
        .map_err(candle_err("cross entropy"))
}
